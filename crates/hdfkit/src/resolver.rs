//! Path resolution across hard, soft and external links.
//!
//! A walk keeps two sets. `visited` holds every object reached by the
//! requested path itself; a soft or external link whose target lands on one
//! of them is circular. `followed` holds every soft or external link taken
//! during the walk, so a link that is reached again while its own target is
//! being resolved also stops the walk. Together they bound a walk by the
//! number of distinct links and objects involved.

use std::collections::HashSet;
use std::sync::Arc;

use hdfkit_format::link_message::LinkTarget;
use hdfkit_format::object_header::ObjectHeader;

use crate::debug::structure;
use crate::error::{Error, Result};
use crate::reader::File;
use crate::source::Source;

/// What the caller expects at the end of the path, for error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Want {
    Group,
    Dataset,
    Any,
}

/// The object a path leads to.
pub(crate) struct Target {
    pub(crate) source: Arc<Source>,
    pub(crate) header: Arc<ObjectHeader>,
    /// Normalized absolute path as requested.
    pub(crate) path: String,
}

/// Path components, ignoring empty and `.` segments.
pub(crate) fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|p| !p.is_empty() && *p != ".").collect()
}

pub(crate) fn normalize(path: &str) -> String {
    format!("/{}", components(path).join("/"))
}

pub(crate) struct Walker<'f> {
    file: &'f File,
    trace: bool,
    visited: HashSet<(usize, u64)>,
    followed: HashSet<(usize, u64, String)>,
}

impl<'f> Walker<'f> {
    pub(crate) fn new(file: &'f File, trace: bool) -> Self {
        Walker {
            file,
            trace,
            visited: HashSet::new(),
            followed: HashSet::new(),
        }
    }

    /// Resolve an absolute path from the file's root group.
    pub(crate) fn resolve(mut self, path: &str, want: Want) -> Result<Target> {
        let root = self.file.root_source();
        let parts = components(path);
        let display = normalize(path);
        let start = root.root_address();
        let (source, address) = self.walk(root, start, "", &parts, want, true)?;
        let header = source.header(address, &display, self.trace)?;
        match want {
            Want::Dataset if !header.is_dataset() => {
                return Err(Error::NotADataset {
                    at: source.at(&display),
                })
            }
            Want::Group if !header.is_group() => {
                return Err(Error::NotAGroup {
                    at: source.at(&display),
                })
            }
            _ => {}
        }
        Ok(Target {
            source,
            header,
            path: display,
        })
    }

    /// Follow `parts` from the group at `start`. `prefix` is the path of
    /// `start`, used in errors. Only the outermost walk records `visited`.
    fn walk(
        &mut self,
        mut source: Arc<Source>,
        start: u64,
        prefix: &str,
        parts: &[&str],
        want: Want,
        record: bool,
    ) -> Result<(Arc<Source>, u64)> {
        let mut address = start;
        let mut here = prefix.to_owned();
        if record {
            self.visited.insert((source.id, address));
        }
        for (i, name) in parts.iter().enumerate() {
            let last = i + 1 == parts.len();
            let parent = here.clone();
            here = format!("{}/{name}", parent.trim_end_matches('/'));

            let header = source.header(address, display_or_root(&parent), self.trace)?;
            if !header.is_group() {
                return Err(Error::NotAGroup {
                    at: source.at(display_or_root(&parent)),
                });
            }
            let links = source.links(&header, display_or_root(&parent), self.trace)?;
            let Some(link) = links.iter().find(|l| l.name == *name) else {
                let at = source.at(&here);
                return Err(if last && want == Want::Dataset {
                    Error::DatasetNotFound { at }
                } else {
                    Error::GroupNotFound { at }
                });
            };
            let step_want = if last { want } else { Want::Group };

            match &link.target {
                LinkTarget::Hard {
                    object_header_address,
                } => {
                    address = *object_header_address;
                }
                LinkTarget::Soft { target_path } => {
                    self.enter(&source, address, name, &here)?;
                    structure!(self.trace, file = %source.name, link = %here, target = %target_path, "soft link");
                    let target_parts = components(target_path);
                    let (from, from_path) = if target_path.starts_with('/') {
                        (source.root_address(), String::new())
                    } else {
                        (address, parent.clone())
                    };
                    let (s, a) = self.walk(source.clone(), from, &from_path, &target_parts, step_want, false)?;
                    self.land(&s, a, &here, target_path)?;
                    source = s;
                    address = a;
                }
                LinkTarget::External {
                    filename,
                    object_path,
                } => {
                    self.enter(&source, address, name, &here)?;
                    structure!(
                        self.trace,
                        file = %source.name,
                        link = %here,
                        target_file = %filename,
                        target = %object_path,
                        "external link"
                    );
                    let ext = self.file.external(&source, filename, &here, self.trace)?;
                    let ext_root = ext.root_address();
                    let target_parts = components(object_path);
                    let (s, a) = self.walk(ext, ext_root, "", &target_parts, step_want, false)?;
                    self.land(&s, a, &here, &format!("{filename}:{object_path}"))?;
                    source = s;
                    address = a;
                }
            }
            if record {
                self.visited.insert((source.id, address));
            }
        }
        Ok((source, address))
    }

    fn enter(&mut self, source: &Source, group: u64, name: &str, here: &str) -> Result<()> {
        if self.followed.insert((source.id, group, name.to_owned())) {
            Ok(())
        } else {
            Err(Error::CircularLink {
                at: source.at(here),
                detail: "link is part of its own target path".into(),
            })
        }
    }

    fn land(&self, source: &Source, address: u64, here: &str, target: &str) -> Result<()> {
        if self.visited.contains(&(source.id, address)) {
            return Err(Error::CircularLink {
                at: source.at(here),
                detail: format!("{target} leads back to an object already on the path"),
            });
        }
        Ok(())
    }
}

fn display_or_root(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}
