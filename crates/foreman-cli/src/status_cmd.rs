//! The `foreman status` command: print the project and the agent table.

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;

use foreman_db::queries::{agents, projects};

pub async fn run_status(pool: &SqlitePool) -> Result<()> {
    let Some(project) = projects::get_project(pool).await? else {
        println!("No project initialized. Run `foreman run <roster.toml>` first.");
        return Ok(());
    };

    println!("Project: {} [{}]", project.name, project.phase);
    println!("Working directory: {}", project.working_dir);
    println!("Started: {}", project.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(completed_at) = project.completed_at {
        println!("Completed: {}", completed_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!();

    let all = agents::list_agents(pool).await?;
    if all.is_empty() {
        println!("No agents seeded.");
        return Ok(());
    }

    println!(
        "{:<16} {:<10} {:>7} {:>12}  {}",
        "ROLE", "STATUS", "RETRIES", "HEARTBEAT", "LAST MESSAGE"
    );
    for agent in &all {
        let heartbeat = match agent.last_heartbeat_at {
            Some(ts) => {
                let age = Utc::now().signed_duration_since(ts);
                format!("{}s ago", age.num_seconds().max(0))
            }
            None => "-".to_string(),
        };
        println!(
            "{:<16} {:<10} {:>7} {:>12}  {}",
            agent.role,
            agent.status.to_string(),
            agent.retry_count,
            heartbeat,
            agent.last_message.as_deref().unwrap_or("-"),
        );
    }

    Ok(())
}
