use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{error::FsError, fs::FileSystem, ids::TaskId};

const KEY_VALUE_SEPARATOR: &str = "\t";

/// Escritor de registros de texto dentro del directorio de trabajo de un
/// intento.
///
/// Cada registro es una línea `clave\tvalor`; si falta uno de los dos se
/// escribe sólo el presente, y si faltan ambos no se escribe nada.
/// El archivo (y con él el directorio de trabajo) se crea en la primera
/// llamada a `write`.
pub struct TextOutputWriter {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    out: Option<Box<dyn Write + Send>>,
    records: u64,
}

impl TextOutputWriter {
    pub fn new(fs: Arc<dyn FileSystem>, work_dir: &Path, task: &TaskId) -> Self {
        Self {
            fs,
            path: work_dir.join(task.part_file_name()),
            out: None,
            records: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, key: Option<&str>, value: Option<&str>) -> Result<(), FsError> {
        if self.out.is_none() {
            self.out = Some(self.fs.create(&self.path)?);
        }
        let Some(out) = self.out.as_mut() else {
            return Ok(());
        };

        let line = match (key, value) {
            (None, None) => return Ok(()),
            (Some(k), None) => format!("{}\n", k),
            (None, Some(v)) => format!("{}\n", v),
            (Some(k), Some(v)) => format!("{}{}{}\n", k, KEY_VALUE_SEPARATOR, v),
        };

        out.write_all(line.as_bytes())
            .map_err(|e| FsError::io("write", &self.path, e))?;
        self.records += 1;
        Ok(())
    }

    /// Cierra el archivo y devuelve cuántos registros se escribieron.
    pub fn close(mut self) -> Result<u64, FsError> {
        if let Some(mut out) = self.out.take() {
            out.flush().map_err(|e| FsError::io("write", &self.path, e))?;
        }
        Ok(self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFileSystem;
    use std::fs;

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir().join("committer_output_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn task() -> TaskId {
        "task_200707121733_0001_m_000000".parse().unwrap()
    }

    #[test]
    fn escribe_clave_valor_y_omite_nulos() {
        let tmp = temp_dir("lines");
        let work = tmp.join("work");
        let mut w = TextOutputWriter::new(Arc::new(LocalFileSystem), &work, &task());

        w.write(Some("key1"), Some("val1")).unwrap();
        w.write(None, None).unwrap();
        w.write(None, Some("val1")).unwrap();
        w.write(Some("key2"), None).unwrap();
        assert_eq!(w.close().unwrap(), 3);

        let content = fs::read_to_string(work.join("part-m-00000")).unwrap();
        assert_eq!(content, "key1\tval1\nval1\nkey2\n");
    }

    #[test]
    fn sin_escrituras_no_crea_directorio() {
        let tmp = temp_dir("lazy");
        let work = tmp.join("work");
        let w = TextOutputWriter::new(Arc::new(LocalFileSystem), &work, &task());
        assert_eq!(w.close().unwrap(), 0);
        assert!(!work.exists());
    }
}
