use anyhow::Result;
use clap::{Parser, Subcommand};
use committer::{JobInfo, JobRequest, JobResults, WorkerMetrics};
use reqwest::{Client, StatusCode};
use std::env;

/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
fn master_base_url() -> String {
    env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con el master")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Envía un job de conteo de palabras
    Submit {
        #[arg(value_name = "NOMBRE")]
        name: String,

        /// Patrón de archivos de entrada (una tarea map por archivo)
        #[arg(long, default_value = "/data/input/*")]
        input_glob: String,

        /// Directorio de salida final del job
        #[arg(long, default_value = "/data/output")]
        output_dir: String,
    },
    /// Consulta el estado de un job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Lista los archivos de salida de un job
    Results {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Cancela un job y descarta su salida parcial
    Kill {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },

    Workers,
}

fn print_job(job: &JobInfo) {
    println!("Job:");
    println!("  id: {}", job.id);
    println!("  nombre: {}", job.name);
    println!("  estado: {:?}", job.status);
    println!("  intento de job: {}", job.app_attempt);

    println!(
        "  tareas: total={}, completadas={}, recuperadas={}, fallidas={}, reintentos={}",
        job.total_tasks, job.completed_tasks, job.recovered_tasks, job.failed_tasks, job.retries
    );

    // progreso calculado localmente
    if job.total_tasks > 0 {
        let pct = (job.completed_tasks as f64 / job.total_tasks as f64) * 100.0;
        println!("  progreso: {:.1}%", pct);
    } else {
        println!("  progreso: (sin tareas)");
    }

    println!("  input_glob: {}", job.input_glob);
    println!("  output_dir: {}", job.output_dir);
    println!("  submitted_at: {}", job.submitted_at);
    if let Some(ref started) = job.started_at {
        println!("  iniciado: {}", started);
    }
    if let Some(ref done) = job.finished_at {
        println!("  finalizado: {}", done);
    }
    if let Some(ref err) = job.last_error {
        println!("  último error: {}", err);
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = master_base_url();

    match cli.command {
        Commands::Submit {
            name,
            input_glob,
            output_dir,
        } => {
            let url = format!("{}/api/v1/jobs", base_url);
            let req = JobRequest {
                name,
                input_glob,
                output_dir,
            };

            let resp = client.post(&url).json(&req).send().await?;
            match resp.status() {
                s if s.is_success() => {
                    let job_info: JobInfo = resp.json().await?;
                    println!("Job creado.");
                    print_job(&job_info);
                }
                StatusCode::CONFLICT => {
                    println!("Error: {} ya tiene una salida commiteada", req.output_dir);
                }
                s => println!("Error creando job (status {})", s),
            }
        }

        Commands::Status { id } => {
            let url = format!("{}/api/v1/jobs/{}", base_url, id);
            let resp = client.get(&url).send().await?;
            if resp.status().is_success() {
                let job: JobInfo = resp.json().await?;
                print_job(&job);
            } else {
                println!("Error: job no encontrado (status {})", resp.status());
            }
        }

        Commands::Results { id } => {
            let url = format!("{}/api/v1/jobs/{id}/results", base_url);
            let resp = client.get(&url).send().await?;

            if resp.status().is_success() {
                let results: JobResults = resp.json().await?;
                println!("Resultados para job {}:", results.job_id);
                println!("  directorio de salida: {}", results.output_dir);
                println!(
                    "  completo (_SUCCESS): {}",
                    if results.complete { "sí" } else { "no" }
                );
                if results.files.is_empty() {
                    println!("  (sin archivos de salida)");
                } else {
                    println!("  archivos:");
                    for f in results.files {
                        println!("    - {}", f);
                    }
                }
            } else {
                println!("No se encontraron resultados para job {id}");
            }
        }

        Commands::Kill { id } => {
            let url = format!("{}/api/v1/jobs/{id}/kill", base_url);
            let resp = client.post(&url).send().await?;
            match resp.status() {
                s if s.is_success() => {
                    let job: JobInfo = resp.json().await?;
                    println!("Job {} cancelado.", job.id);
                    print_job(&job);
                }
                StatusCode::CONFLICT => {
                    println!("El job {id} ya terminó o está commiteando, no se puede cancelar");
                }
                s => println!("Error cancelando job {id} (status {})", s),
            }
        }

        Commands::Workers => {
            let url = format!("{}/api/v1/workers", base_url);
            let resp = client.get(&url).send().await?;
            if resp.status().is_success() {
                let workers: Vec<WorkerMetrics> = resp.json().await?;
                if workers.is_empty() {
                    println!("No hay workers registrados.");
                } else {
                    for w in workers {
                        println!("Worker {}", w.worker_id);
                        println!("  host           : {}", w.hostname);
                        println!("  dead           : {}", w.dead);
                        println!("  last_heartbeat : {} s ago", w.last_heartbeat_secs_ago);
                        println!(
                            "  concurrency    : max={}, activas={}",
                            w.max_concurrency, w.active_tasks
                        );
                        println!(
                            "  tareas         : started={}, ok={}, failed={}",
                            w.tasks_started, w.tasks_succeeded, w.tasks_failed
                        );
                        match w.avg_task_ms {
                            Some(avg) => println!("  avg_task_ms    : {:.1}", avg),
                            None => println!("  avg_task_ms    : (sin datos)"),
                        }
                        match w.cpu_percent {
                            Some(cpu) => println!("  cpu_percent    : {:.1}%", cpu),
                            None => println!("  cpu_percent    : (sin datos)"),
                        }
                        match w.mem_bytes {
                            Some(mem) => println!("  mem_bytes      : {}", mem),
                            None => println!("  mem_bytes      : (sin datos)"),
                        }
                        println!();
                    }
                }
            } else {
                println!(
                    "Error consultando /api/v1/workers (status {})",
                    resp.status()
                );
            }
        }
    }

    Ok(())
}
