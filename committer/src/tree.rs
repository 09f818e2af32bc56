//! Movimiento de árboles sobre la interfaz de almacenamiento.
//!
//! Recorrido iterativo con cola; nunca recursión del lenguaje, así la
//! profundidad del árbol de salida no afecta al stack.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{error::FsError, fs::FileSystem};

/// Mueve `src` (archivo o directorio) a `dst` con semántica de
/// sobreescritura:
///   - si `dst` no existe, un único rename;
///   - archivo sobre archivo: se borra el destino y se renombra;
///   - directorio sobre directorio: se mezclan los hijos.
///
/// Es seguro re-ejecutarlo tras un fallo parcial: lo ya movido no está en
/// `src` y un `NotFound` de origen se trata como "ya hecho".
/// Devuelve la cantidad de renames realizados.
pub fn merge_into(fs: &dyn FileSystem, src: &Path, dst: &Path) -> Result<usize, FsError> {
    let mut queue: VecDeque<(PathBuf, PathBuf)> = VecDeque::new();
    queue.push_back((src.to_path_buf(), dst.to_path_buf()));

    // directorios de origen ya vaciados, en orden de descubrimiento
    let mut emptied: Vec<PathBuf> = Vec::new();
    let mut renames = 0;

    while let Some((s, d)) = queue.pop_front() {
        if !fs.exists(&s) {
            debug!("{} ya no existe, se asume movido", s.display());
            continue;
        }

        if fs.is_dir(&s) && fs.is_dir(&d) {
            for child in fs.list_children(&s)? {
                let Some(name) = child.file_name() else {
                    continue;
                };
                let target = d.join(name);
                queue.push_back((child, target));
            }
            emptied.push(s);
            continue;
        }

        if fs.exists(&d) {
            // tipos distintos o archivo sobre archivo: gana el origen
            fs.delete(&d, true)?;
        }

        match fs.rename(&s, &d) {
            Ok(()) => renames += 1,
            Err(FsError::NotFound(_)) => {
                debug!("{} desapareció antes del rename", s.display());
            }
            Err(e) => return Err(e),
        }
    }

    for dir in emptied.iter().rev() {
        fs.delete(dir, false)?;
    }

    Ok(renames)
}

/// `true` si `path` existe y tiene al menos un hijo.
pub fn has_children(fs: &dyn FileSystem, path: &Path) -> Result<bool, FsError> {
    if !fs.exists(path) {
        return Ok(false);
    }
    match fs.list_children(path) {
        Ok(children) => Ok(!children.is_empty()),
        Err(FsError::NotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFileSystem;
    use std::{fs, io::Write};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir().join("committer_tree_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn write(path: &Path, content: &str) {
        let mut w = LocalFileSystem.create(path).unwrap();
        w.write_all(content.as_bytes()).unwrap();
        w.flush().unwrap();
    }

    #[test]
    fn merge_mueve_directorio_entero_si_destino_no_existe() {
        let tmp = temp_dir("whole");
        write(&tmp.join("src/a/b.txt"), "b");
        write(&tmp.join("src/c.txt"), "c");

        let n = merge_into(&LocalFileSystem, &tmp.join("src"), &tmp.join("dst")).unwrap();

        assert_eq!(n, 1);
        assert!(!tmp.join("src").exists());
        assert_eq!(fs::read_to_string(tmp.join("dst/a/b.txt")).unwrap(), "b");
        assert_eq!(fs::read_to_string(tmp.join("dst/c.txt")).unwrap(), "c");
    }

    #[test]
    fn merge_sobreescribe_archivos_y_conserva_los_demas() {
        let tmp = temp_dir("overwrite");
        write(&tmp.join("src/part-0"), "nuevo");
        write(&tmp.join("src/sub/x"), "x");
        write(&tmp.join("dst/part-0"), "viejo");
        write(&tmp.join("dst/otro"), "otro");
        write(&tmp.join("dst/sub/y"), "y");

        merge_into(&LocalFileSystem, &tmp.join("src"), &tmp.join("dst")).unwrap();

        assert!(!tmp.join("src").exists());
        assert_eq!(fs::read_to_string(tmp.join("dst/part-0")).unwrap(), "nuevo");
        assert_eq!(fs::read_to_string(tmp.join("dst/otro")).unwrap(), "otro");
        assert_eq!(fs::read_to_string(tmp.join("dst/sub/x")).unwrap(), "x");
        assert_eq!(fs::read_to_string(tmp.join("dst/sub/y")).unwrap(), "y");
    }

    #[test]
    fn merge_de_origen_inexistente_no_hace_nada() {
        let tmp = temp_dir("missing");
        let n = merge_into(&LocalFileSystem, &tmp.join("nada"), &tmp.join("dst")).unwrap();
        assert_eq!(n, 0);
        assert!(!tmp.join("dst").exists());
    }

    #[test]
    fn has_children_distingue_vacio_y_ausente() {
        let tmp = temp_dir("children");
        fs::create_dir_all(tmp.join("vacio")).unwrap();
        write(&tmp.join("lleno/f"), "");

        assert!(!has_children(&LocalFileSystem, &tmp.join("ausente")).unwrap());
        assert!(!has_children(&LocalFileSystem, &tmp.join("vacio")).unwrap());
        assert!(has_children(&LocalFileSystem, &tmp.join("lleno")).unwrap());
    }
}
