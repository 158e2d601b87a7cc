//! Prompt factory: composes the system prompt handed to a spawned worker.
//!
//! The document is markdown assembled from project state, a
//! per-worker-kind responsibility blurb, the engine contract the worker
//! must follow, and (on restart) the recovery context synthesized by the
//! checkpoint service.

use foreman_db::models::Project;

/// Responsibility blurb for a worker kind. Unknown kinds get the generic
/// template; the kind string itself stays opaque to the engine.
fn kind_responsibilities(worker_kind: &str) -> &'static str {
    match worker_kind {
        "architect" => {
            "Design the system before anyone builds it: produce the module \
             breakdown, interfaces, and data model the other roles will \
             implement. Record decisions as artifacts."
        }
        "developer" => {
            "Implement the design produced by your upstream roles. Work in \
             small increments, keep the build green, and declare every file \
             you produce as an artifact."
        }
        "tester" => {
            "Exercise what the developers built: write and run tests, \
             report failures as error messages addressed to the roles that \
             own the code."
        }
        "reviewer" => {
            "Review completed work for correctness and consistency with the \
             project brief. Raise questions rather than rewriting."
        }
        _ => {
            "Carry out the work your role is responsible for, coordinating \
             with the other roles over the message bus."
        }
    }
}

/// Render the full system prompt for a worker.
pub fn render_system_prompt(
    worker_kind: &str,
    role: &str,
    project: &Project,
    recovery_context: Option<&str>,
) -> String {
    let mut out = String::new();

    out.push_str(&format!("# Role: {role}\n\n"));
    out.push_str(&format!(
        "You are the {role} agent of project \"{}\", supervised by the \
         foreman engine. You are one of several autonomous workers; the \
         engine schedules you once your dependencies complete and restarts \
         you from your last checkpoint if you stall.\n\n",
        project.name
    ));

    out.push_str("## Project\n\n");
    out.push_str(&format!("- **Name**: {}\n", project.name));
    out.push_str(&format!("- **Working directory**: {}\n", project.working_dir));
    out.push_str(&format!("- **Phase**: {}\n\n", project.phase));

    if let Some(brief) = project.brief.as_deref() {
        if !brief.trim().is_empty() {
            out.push_str("## Brief\n\n");
            out.push_str(brief.trim());
            out.push_str("\n\n");
        }
    }

    out.push_str("## Responsibilities\n\n");
    out.push_str(kind_responsibilities(worker_kind));
    out.push_str("\n\n");

    out.push_str("## Engine Contract\n\n");
    out.push_str(
        "- Call the `heartbeat` tool regularly while you work; a lapsed \
         heartbeat is treated as a stall and your process is restarted.\n\
         - Call `checkpoint` after each completed unit of work, listing \
         completed and pending items; checkpoints are how restarts resume.\n\
         - Call `complete` when your work is done. Exiting the process does \
         not signal completion.\n\
         - Use `send_message` to talk to other roles and `request_help` \
         when you are blocked.\n\n",
    );

    if let Some(recovery) = recovery_context {
        if !recovery.trim().is_empty() {
            out.push_str(recovery.trim());
            out.push_str("\n\n");
        }
    }

    out
}
