//! Interfaz de almacenamiento que consume el protocolo de commit.
//!
//! Sólo se asume rename atómico de una ruta, borrado, creación de
//! directorios y listado. No hay transacciones multi-archivo ni
//! compare-and-swap.

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::error::FsError;

pub trait FileSystem: Send + Sync {
    /// Renombra `src` a `dst`. Nunca sobreescribe: si `dst` existe
    /// devuelve `AlreadyExists`; si `src` no existe, `NotFound`.
    fn rename(&self, src: &Path, dst: &Path) -> Result<(), FsError>;

    /// Borra `path`. Devuelve `Ok(false)` si no existía.
    fn delete(&self, path: &Path, recursive: bool) -> Result<bool, FsError>;

    fn mkdirs(&self, path: &Path) -> Result<(), FsError>;

    fn exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    /// Hijos directos de `path`, ordenados por nombre.
    fn list_children(&self, path: &Path) -> Result<Vec<PathBuf>, FsError>;

    /// Crea (o trunca) un archivo, creando los directorios padre.
    fn create(&self, path: &Path) -> Result<Box<dyn Write + Send>, FsError>;
}

/// Sistema de archivos local (o un volumen compartido montado, ej: `/data`).
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        LocalFileSystem
    }

    /// Borrado recursivo con una pila explícita: primero archivos,
    /// luego directorios del más profundo al más superficial.
    fn delete_tree(&self, root: &Path) -> Result<(), FsError> {
        let mut pending = vec![root.to_path_buf()];
        let mut dirs: Vec<PathBuf> = Vec::new();

        while let Some(dir) = pending.pop() {
            for child in self.list_children(&dir)? {
                let meta = fs::symlink_metadata(&child)
                    .map_err(|e| FsError::io("delete", &child, e))?;
                if meta.is_dir() {
                    pending.push(child);
                } else {
                    fs::remove_file(&child).map_err(|e| FsError::io("delete", &child, e))?;
                }
            }
            dirs.push(dir);
        }

        for dir in dirs.iter().rev() {
            fs::remove_dir(dir).map_err(|e| FsError::io("delete", dir, e))?;
        }
        Ok(())
    }
}

impl FileSystem for LocalFileSystem {
    fn rename(&self, src: &Path, dst: &Path) -> Result<(), FsError> {
        if fs::symlink_metadata(src).is_err() {
            return Err(FsError::NotFound(src.to_path_buf()));
        }
        if fs::symlink_metadata(dst).is_ok() {
            return Err(FsError::AlreadyExists(dst.to_path_buf()));
        }
        fs::rename(src, dst).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(src.to_path_buf()),
            _ => FsError::io("rename", src, e),
        })
    }

    fn delete(&self, path: &Path, recursive: bool) -> Result<bool, FsError> {
        let meta = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(FsError::io("delete", path, e)),
        };

        if !meta.is_dir() {
            fs::remove_file(path).map_err(|e| FsError::io("delete", path, e))?;
        } else if recursive {
            self.delete_tree(path)?;
        } else {
            fs::remove_dir(path).map_err(|e| FsError::io("delete", path, e))?;
        }
        Ok(true)
    }

    fn mkdirs(&self, path: &Path) -> Result<(), FsError> {
        fs::create_dir_all(path).map_err(|e| FsError::io("mkdirs", path, e))
    }

    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    fn is_dir(&self, path: &Path) -> bool {
        fs::symlink_metadata(path)
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    fn list_children(&self, path: &Path) -> Result<Vec<PathBuf>, FsError> {
        let entries = fs::read_dir(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(path.to_path_buf()),
            _ => FsError::io("list", path, e),
        })?;

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FsError::io("list", path, e))?;
            out.push(entry.path());
        }
        out.sort();
        Ok(out)
    }

    fn create(&self, path: &Path) -> Result<Box<dyn Write + Send>, FsError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                self.mkdirs(parent)?;
            }
        }
        let file = File::create(path).map_err(|e| FsError::io("create", path, e))?;
        Ok(Box::new(BufWriter::new(file)))
    }
}
