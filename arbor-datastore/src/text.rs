//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};

use arbor_xml::parse::parse_document;
use arbor_xml::print::tree_to_string;
use arbor_xml::XmlTree;

use crate::error::Error;
use crate::store::Db;

/// One file per named store: `<dir>/<name>_db`, holding a `<config>` root
/// with an optional `<yang-library>` module-state block in front of the
/// content.
pub fn db_path(dir: &Path, db: Db) -> PathBuf {
    dir.join(format!("{}_db", db.as_str()))
}

/// Reads and parses a datastore file. `None` if the file does not exist.
pub fn read_db(dir: &Path, db: Db) -> Result<Option<XmlTree>, Error> {
    let path = db_path(dir, db);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Ok(None);
        }
        Err(error) => {
            return Err(Error::Io(path.display().to_string(), error));
        }
    };
    if text.trim().is_empty() {
        return Ok(Some(XmlTree::new("config")));
    }
    Ok(Some(parse_document(&text)?))
}

/// Writes a datastore file atomically: temp file in the same directory,
/// then rename over the target, under an advisory lock so concurrent
/// processes serialize on the directory.
pub fn write_db(dir: &Path, db: Db, tree: &XmlTree) -> Result<(), Error> {
    std::fs::create_dir_all(dir)
        .map_err(|error| Error::Io(dir.display().to_string(), error))?;
    let _lock = dir_lock(dir)?;

    let path = db_path(dir, db);
    let tmp_path = dir.join(format!(".{}_db.tmp", db.as_str()));
    let mut tmp = File::create(&tmp_path)
        .map_err(|error| Error::Io(tmp_path.display().to_string(), error))?;
    tmp.write_all(tree_to_string(tree, true).as_bytes())
        .and_then(|_| tmp.sync_all())
        .map_err(|error| Error::Io(tmp_path.display().to_string(), error))?;
    std::fs::rename(&tmp_path, &path)
        .map_err(|error| Error::Io(path.display().to_string(), error))
}

pub fn remove_db(dir: &Path, db: Db) -> Result<(), Error> {
    let path = db_path(dir, db);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(Error::Io(path.display().to_string(), error)),
    }
}

pub fn db_exists(dir: &Path, db: Db) -> bool {
    db_path(dir, db).exists()
}

/// Copies one store's file over another, byte-for-byte, atomically.
pub fn copy_db(dir: &Path, src: Db, dst: Db) -> Result<(), Error> {
    let src_path = db_path(dir, src);
    let text = std::fs::read_to_string(&src_path)
        .map_err(|error| Error::Io(src_path.display().to_string(), error))?;
    let _lock = dir_lock(dir)?;
    let tmp_path = dir.join(format!(".{}_db.tmp", dst.as_str()));
    std::fs::write(&tmp_path, text)
        .map_err(|error| Error::Io(tmp_path.display().to_string(), error))?;
    let dst_path = db_path(dir, dst);
    std::fs::rename(&tmp_path, &dst_path)
        .map_err(|error| Error::Io(dst_path.display().to_string(), error))
}

// Advisory whole-directory lock held across a write.
fn dir_lock(dir: &Path) -> Result<Flock<File>, Error> {
    let path = dir.join(".lock");
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|error| Error::Io(path.display().to_string(), error))?;
    Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_, errno)| {
            Error::Io(path.display().to_string(), errno.into())
        })
}
