use std::env;

use shellflow::jobs::store::{JobStore, QueueStore};
use shellflow::jobs::{NewJob, PgJobStore, Priority, QueueEntry, RedisQueue};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!(
            "shellctl <command>\n\
             Commands:\n\
             - enqueue [--priority high|medium|low] [--timeout secs] <command> [args...]\n\
             - cancel <job_id> [ttl_secs]\n\
             - show <job_id>\n\
             - logs <job_id>\n\
             - counts\n\
             - reset\n\
             \n\
             Uses DATABASE_URL and REDIS_URL (or SHELLFLOW_REDIS_URL).\n"
        );
        std::process::exit(2);
    }

    dotenvy::dotenv().ok();

    let database_url = env::var("DATABASE_URL")
        .or_else(|_| env::var("TEST_DATABASE_URL"))
        .expect("DATABASE_URL or TEST_DATABASE_URL must be set");
    let redis_url = env::var("SHELLFLOW_REDIS_URL")
        .or_else(|_| env::var("REDIS_URL"))
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let store = PgJobStore::new(pool.clone());
    let queue = RedisQueue::connect(&redis_url).await?;

    match args[1].as_str() {
        "enqueue" => enqueue(&store, &queue, &args[2..]).await?,
        "cancel" => {
            let id: Uuid = args
                .get(2)
                .expect("usage: shellctl cancel <job_id> [ttl_secs]")
                .parse()?;
            let ttl: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(3_600);
            queue.set_cancel_flag(id, ttl).await?;
            println!("cancellation requested for job {id} (flag expires in {ttl}s)");
        }
        "show" => {
            let id: Uuid = args.get(2).expect("usage: shellctl show <job_id>").parse()?;
            match store.get(id).await? {
                Some(job) => println!(
                    "JOB: id={} command={:?} parameters={:?} priority={} timeout_seconds={} status={} exit_code={:?} created_at={} started_at={:?} completed_at={:?}",
                    job.id,
                    job.command,
                    job.parameters,
                    job.priority,
                    job.timeout_seconds,
                    job.status,
                    job.exit_code,
                    job.created_at,
                    job.started_at,
                    job.completed_at
                ),
                None => {
                    eprintln!("no job with id {id}");
                    std::process::exit(1);
                }
            }
        }
        "logs" => {
            let id: Uuid = args.get(2).expect("usage: shellctl logs <job_id>").parse()?;
            for entry in store.list_logs(id).await? {
                print!("{} | {}", entry.timestamp.to_rfc3339(), entry.message);
                if !entry.message.ends_with('\n') {
                    println!();
                }
            }
        }
        "counts" => {
            let counts = store.status_counts().await?;
            println!(
                "jobs: queued={} running={} completed={} failed={} cancelled={}",
                counts.queued, counts.running, counts.completed, counts.failed, counts.cancelled
            );
        }
        "reset" => {
            sqlx::query("TRUNCATE TABLE job_logs, jobs RESTART IDENTITY CASCADE")
                .execute(&pool)
                .await?;
            println!("reset OK");
        }
        other => {
            eprintln!("Unknown command: {other}");
            std::process::exit(2);
        }
    }

    Ok(())
}

async fn enqueue(store: &PgJobStore, queue: &RedisQueue, args: &[String]) -> anyhow::Result<()> {
    let mut priority = Priority::Medium;
    let mut timeout_seconds: i32 = 60;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--priority" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("--priority needs a value"))?;
                priority = Priority::parse(value)
                    .ok_or_else(|| anyhow::anyhow!("unknown priority {value:?}"))?;
                i += 2;
            }
            "--timeout" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("--timeout needs a value"))?;
                timeout_seconds = value.parse()?;
                i += 2;
            }
            _ => break,
        }
    }

    let rest = &args[i..];
    if rest.is_empty() {
        anyhow::bail!("usage: shellctl enqueue [--priority P] [--timeout N] <command> [args...]");
    }

    let job = store
        .create(NewJob {
            command: rest[0].clone(),
            parameters: rest[1..].to_vec(),
            priority,
            timeout_seconds,
        })
        .await?;

    let payload = serde_json::to_string(&QueueEntry::from_job(&job))?;
    queue.push_back(priority, &payload).await?;

    println!("+ enqueued job id={} priority={}", job.id, priority.as_str());
    Ok(())
}
