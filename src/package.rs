use std::fmt;
use std::fs;
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};

/// One entry of the source package, in archive order.
#[derive(Clone, Debug)]
pub struct Member {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    compression: CompressionMethod,
}

/// A package extracted into a private temporary directory.
///
/// The directory is removed when the tree is dropped. Repacking writes the
/// members back in their original order with their original names, so a
/// tree nobody touched repacks to the same member set and contents.
pub struct StagedTree {
    dir: TempDir,
    members: Vec<Member>,
}

fn corrupt(e: impl fmt::Display) -> Error {
    Error::CorruptPackage(e.to_string())
}

/// Reads one member without trusting its declared size for allocation;
/// a member whose content disagrees with that size is corrupt.
fn read_member(reader: &mut impl Read, declared: u64, name: &str) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data).map_err(corrupt)?;
    if data.len() as u64 != declared {
        return Err(corrupt(format!(
            "member {:?} declares {} bytes but holds {}",
            name,
            declared,
            data.len()
        )));
    }
    Ok(data)
}

fn write_failed(e: impl fmt::Display) -> Error {
    Error::Io(io::Error::other(e.to_string()))
}

impl StagedTree {
    /// Extracts below the system temporary directory.
    pub fn unpack(package: &[u8]) -> Result<StagedTree> {
        let dir = tempfile::Builder::new().prefix("mission_").tempdir()?;
        Self::unpack_into(package, dir)
    }

    /// Extracts into a fresh, uniquely named directory below `parent`.
    pub fn unpack_in(package: &[u8], parent: &Path) -> Result<StagedTree> {
        fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new()
            .prefix("mission_")
            .tempdir_in(parent)?;
        Self::unpack_into(package, dir)
    }

    fn unpack_into(package: &[u8], dir: TempDir) -> Result<StagedTree> {
        let mut archive = ZipArchive::new(Cursor::new(package)).map_err(corrupt)?;
        let mut members = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(corrupt)?;
            let name = entry.name().to_string();
            let path = entry
                .enclosed_name()
                .map(|p| p.to_path_buf())
                .ok_or_else(|| corrupt(format!("member {:?} escapes the package root", name)))?;
            let target = dir.path().join(&path);
            if entry.is_dir() {
                fs::create_dir_all(&target)?;
            } else {
                let size = entry.size();
                let data = read_member(&mut entry, size, &name)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&target, data)?;
            }
            log::trace!("package: staged {}", name);
            members.push(Member {
                name,
                path,
                is_dir: entry.is_dir(),
                compression: entry.compression(),
            });
        }
        log::debug!(
            "package: staged {} members in {}",
            members.len(),
            dir.path().display()
        );
        Ok(StagedTree { dir, members })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Writes the tree as a ZIP package into `out` and hands it back.
    pub fn repack_to<W: Write + Seek>(&self, out: W) -> Result<W> {
        let mut zip = ZipWriter::new(out);
        for member in &self.members {
            let options = write_options(member.compression);
            if member.is_dir {
                zip.add_directory(member.name.as_str(), options)
                    .map_err(write_failed)?;
                continue;
            }
            let data = fs::read(self.root().join(&member.path))?;
            zip.start_file(member.name.as_str(), options)
                .map_err(write_failed)?;
            zip.write_all(&data)?;
        }
        zip.finish().map_err(write_failed)
    }

    pub fn repack(&self) -> Result<Vec<u8>> {
        Ok(self.repack_to(Cursor::new(Vec::new()))?.into_inner())
    }

    /// Removes the staging directory, reporting failures instead of
    /// ignoring them as drop does.
    pub fn close(self) -> Result<()> {
        self.dir.close()?;
        Ok(())
    }
}

/// A member of an in-memory package.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub name: String,
    pub data: Vec<u8>,
    pub is_dir: bool,
    compression: CompressionMethod,
}

impl Entry {
    pub fn file(name: impl Into<String>, data: Vec<u8>) -> Entry {
        Entry {
            name: name.into(),
            data,
            is_dir: false,
            compression: CompressionMethod::Deflated,
        }
    }
}

fn write_options(compression: CompressionMethod) -> SimpleFileOptions {
    let method = match compression {
        CompressionMethod::Stored => CompressionMethod::Stored,
        _ => CompressionMethod::Deflated,
    };
    SimpleFileOptions::default().compression_method(method)
}

/// Reads a whole package into memory, in archive order.
pub fn read_entries(package: &[u8]) -> Result<Vec<Entry>> {
    let mut archive = ZipArchive::new(Cursor::new(package)).map_err(corrupt)?;
    let mut out = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(corrupt)?;
        let name = entry.name().to_string();
        let data = if entry.is_dir() {
            Vec::new()
        } else {
            let size = entry.size();
            read_member(&mut entry, size, &name)?
        };
        out.push(Entry {
            name,
            data,
            is_dir: entry.is_dir(),
            compression: entry.compression(),
        });
    }
    Ok(out)
}

pub fn write_entries(entries: &[Entry]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for entry in entries {
        let options = write_options(entry.compression);
        if entry.is_dir {
            zip.add_directory(entry.name.as_str(), options)
                .map_err(write_failed)?;
        } else {
            zip.start_file(entry.name.as_str(), options)
                .map_err(write_failed)?;
            zip.write_all(&entry.data)?;
        }
    }
    Ok(zip.finish().map_err(write_failed)?.into_inner())
}
