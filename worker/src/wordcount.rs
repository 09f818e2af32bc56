use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
    sync::Arc,
};

use anyhow::{Context, Result};
use committer::{FileSystem, OutputCommitter, Task, TextOutputWriter};
use tracing::info;

/// Cuenta palabras de un archivo de texto.
/// Cada token se limpia a alfanuméricos y '_' y se pasa a minúscula.
pub fn count_words(input_path: &Path) -> io::Result<BTreeMap<String, u64>> {
    let file = File::open(input_path)?;
    let reader = BufReader::new(file);

    let mut counts: BTreeMap<String, u64> = BTreeMap::new();

    for line in reader.lines() {
        let line = line?;
        for raw in line.split_whitespace() {
            let cleaned: String = raw
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
                .to_lowercase();

            if !cleaned.is_empty() {
                *counts.entry(cleaned).or_insert(0) += 1;
            }
        }
    }

    Ok(counts)
}

/// Ejecuta el map de un intento: escribe `palabra\tconteo` en su
/// directorio de trabajo. Devuelve si el intento dejó algo que commitear.
pub fn run_map_attempt(
    fs: Arc<dyn FileSystem>,
    committer: &dyn OutputCommitter,
    task: &Task,
) -> Result<bool> {
    let attempt = &task.attempt_id;
    committer
        .setup_task(attempt)
        .with_context(|| format!("setup de {}", attempt))?;

    let counts = count_words(Path::new(&task.input_path))
        .with_context(|| format!("leyendo {}", task.input_path))?;

    let mut writer =
        TextOutputWriter::new(fs, &committer.work_path(attempt), attempt.task_id());
    for (word, count) in &counts {
        writer.write(Some(word), Some(&count.to_string()))?;
    }
    let records = writer.close()?;
    info!("{}: {} palabras distintas escritas", attempt, records);

    Ok(committer.needs_task_commit(attempt)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use committer::{committer_for, CommitterConfig, JobId, LocalFileSystem, TaskType};
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir().join("worker_wordcount_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn task_for(input: &Path, out: &Path) -> Task {
        let attempt = JobId::new("20240101000000", 1)
            .unwrap()
            .task(TaskType::Map, 3)
            .attempt(0);
        Task {
            attempt_id: attempt,
            input_path: input.to_string_lossy().to_string(),
            output_root: out.to_string_lossy().to_string(),
            committer: CommitterConfig::default(),
        }
    }

    /// Texto normal con mayúsculas y signos.
    #[test]
    fn count_words_normaliza_tokens() {
        let tmp = temp_dir("basic");
        let input_path = tmp.join("input.txt");

        let mut f = fs::File::create(&input_path).unwrap();
        writeln!(f, "Hola hola, mundo!!").unwrap();
        writeln!(f, "mundo   mundo_prueba ...").unwrap();

        let counts = count_words(&input_path).unwrap();
        let got: Vec<(&str, u64)> = counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        assert_eq!(got, vec![("hola", 2), ("mundo", 2), ("mundo_prueba", 1)]);
    }

    #[test]
    fn count_words_falla_si_no_existe_la_entrada() {
        let tmp = temp_dir("missing");
        assert!(count_words(&tmp.join("no_existe.txt")).is_err());
    }

    #[test]
    fn run_map_attempt_escribe_en_el_directorio_de_trabajo() {
        let tmp = temp_dir("attempt");
        let input_path = tmp.join("input.txt");
        fs::write(&input_path, "b a b\n").unwrap();
        let out = tmp.join("out");

        let fs_arc: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let committer = committer_for(fs_arc.clone(), &out, CommitterConfig::default());
        committer.setup_job().unwrap();
        let task = task_for(&input_path, &out);

        let needs_commit = run_map_attempt(fs_arc, committer.as_ref(), &task).unwrap();
        assert!(needs_commit);

        let part = committer.work_path(&task.attempt_id).join("part-m-00003");
        assert_eq!(fs::read_to_string(part).unwrap(), "a\t1\nb\t2\n");
        // nada visible en la salida final todavía
        assert!(!out.join("part-m-00003").exists());
    }

    #[test]
    fn entrada_vacia_no_necesita_commit() {
        let tmp = temp_dir("empty");
        let input_path = tmp.join("empty.txt");
        fs::File::create(&input_path).unwrap();
        let out = tmp.join("out");

        let fs_arc: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let committer = committer_for(fs_arc.clone(), &out, CommitterConfig::default());
        committer.setup_job().unwrap();

        let needs_commit =
            run_map_attempt(fs_arc, committer.as_ref(), &task_for(&input_path, &out)).unwrap();
        assert!(!needs_commit);
    }
}
