//! Backing bytes of an open file: an owned buffer or a read-only mapping.

use std::fs;
use std::io;
use std::path::Path;

pub(crate) enum Storage {
    Owned(Vec<u8>),
    #[cfg(feature = "mmap")]
    Mapped {
        _file: fs::File,
        map: memmap2::Mmap,
    },
}

impl Storage {
    /// Map the file when allowed and non-empty, otherwise read it in.
    pub(crate) fn open(path: &Path, mmap: bool) -> io::Result<Storage> {
        #[cfg(feature = "mmap")]
        {
            if mmap {
                let file = fs::File::open(path)?;
                if file.metadata()?.len() > 0 {
                    // SAFETY: the mapping is read-only; the file must not be
                    // truncated by another process while the handle is open.
                    let map = unsafe { memmap2::Mmap::map(&file)? };
                    return Ok(Storage::Mapped { _file: file, map });
                }
            }
        }
        #[cfg(not(feature = "mmap"))]
        let _ = mmap;
        Ok(Storage::Owned(fs::read(path)?))
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        match self {
            Storage::Owned(v) => v,
            #[cfg(feature = "mmap")]
            Storage::Mapped { map, .. } => map,
        }
    }

    pub(crate) fn is_mapped(&self) -> bool {
        match self {
            Storage::Owned(_) => false,
            #[cfg(feature = "mmap")]
            Storage::Mapped { .. } => true,
        }
    }
}
