use crate::archive;
use crate::client::{self, AgentSession};
use crate::config::{ExportArgs, InterpreterArgs, UpstreamArgs};
use crate::error::{DecodeError, ForgeError, Result};
use crate::interpreter::{EventInterpreter, Message, MessageKind, SessionContext};
use crate::protocol::Event;
use crate::tree::ProjectTree;
use crate::ui;
use std::path::{Path, PathBuf};

/// Where a finished run leaves its code artifact.
pub struct OutputOptions {
    pub artifact: PathBuf,
    pub export: Option<ExportArgs>,
}

pub async fn run(
    task: String,
    upstream: UpstreamArgs,
    interpreter: InterpreterArgs,
    output: OutputOptions,
) -> Result<()> {
    let session = AgentSession::connect(upstream.client_config()).await?;
    let interpreter = interpreter.interpreter();
    let mut context = SessionContext::new();

    tracing::info!(session = session.session_id(), "running task");
    session
        .run_task(&task, |event| handle_event(&interpreter, &mut context, event))
        .await?;

    finish(&context, &output).await
}

pub async fn replay(
    path: PathBuf,
    chunk_size: usize,
    interpreter: InterpreterArgs,
    output: OutputOptions,
) -> Result<()> {
    let interpreter = interpreter.interpreter();
    let mut context = SessionContext::new();

    client::replay(&path, chunk_size, |event| {
        handle_event(&interpreter, &mut context, event)
    })
    .await?;

    finish(&context, &output).await
}

pub async fn tree(artifact: PathBuf) -> Result<()> {
    let tree = load_tree(&artifact).await?;
    print!("{tree}");
    Ok(())
}

pub async fn export(artifact: PathBuf, args: ExportArgs) -> Result<()> {
    let tree = load_tree(&artifact).await?;
    let path = archive::export(&tree, &args.out_dir, &args.name).await?;
    println!("wrote {}", path.display());
    Ok(())
}

pub async fn edit(artifact: PathBuf, args: ExportArgs) -> Result<()> {
    let tree = load_tree(&artifact).await?;
    ui::run_editor(tree, artifact, args)
}

fn handle_event(
    interpreter: &EventInterpreter,
    context: &mut SessionContext,
    event: std::result::Result<Event, DecodeError>,
) {
    match event {
        Ok(event) => {
            for message in interpreter.interpret(&event, context) {
                print_message(&message);
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "discarded event");
        }
    }
}

fn print_message(message: &Message) {
    match message.kind {
        MessageKind::Error => eprintln!("{}", message.text),
        _ => println!("{}", message.text),
    }
}

async fn finish(context: &SessionContext, output: &OutputOptions) -> Result<()> {
    let Some(code) = context.current_code() else {
        tracing::info!("run finished without a code artifact");
        return match output.export {
            Some(_) => Err(ForgeError::NoArtifact),
            None => Ok(()),
        };
    };

    tokio::fs::write(&output.artifact, code).await?;
    tracing::info!(path = %output.artifact.display(), "code artifact saved");

    let tree = match ProjectTree::import(code) {
        Ok(tree) => tree,
        Err(err) => {
            // Keep the raw artifact; only the tree view is unavailable.
            tracing::warn!(error = %err, "code artifact is not a project map");
            return match output.export {
                Some(_) => Err(err.into()),
                None => Ok(()),
            };
        }
    };
    if tree.is_empty() {
        tracing::warn!("code artifact contains no files");
    }
    print!("{tree}");

    if let Some(args) = &output.export {
        let path = archive::export(&tree, &args.out_dir, &args.name).await?;
        println!("wrote {}", path.display());
    }
    Ok(())
}

async fn load_tree(artifact: &Path) -> Result<ProjectTree> {
    let text = tokio::fs::read_to_string(artifact)
        .await
        .map_err(|source| ForgeError::Read {
            path: artifact.to_path_buf(),
            source,
        })?;
    Ok(ProjectTree::import(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::DEFAULT_PRODUCER_ROLES;

    fn interpreter_args() -> InterpreterArgs {
        InterpreterArgs {
            producers: DEFAULT_PRODUCER_ROLES.map(String::from).to_vec(),
            delegation_tool: "transfer_to_agent".to_string(),
            delegation_arg: "agent_name".to_string(),
        }
    }

    const CAPTURE: &str = concat!(
        "data: {\"author\":\"planner_agent\",\"content\":{\"parts\":[{\"text\":\"plan\"}]}}\n\n",
        "data: {\"author\":\"coder_agent\",\"content\":{\"parts\":[{\"functionResponse\":{\"result\":\"{\\\"Main/app.js\\\":\\\"x\\\"}\"}}]}}\n\n",
        "data: {\"author\":\"fixer_agent\",\"content\":{\"parts\":[{\"functionResponse\":{\"result\":\"{\\\"Main/app.js\\\":\\\"fixed\\\",\\\"Main/lib/a.js\\\":\\\"y\\\"}\"}}]}}\n\n",
    );

    #[tokio::test]
    async fn replay_saves_latest_artifact_and_exports() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("run.sse");
        std::fs::write(&capture, CAPTURE).unwrap();
        let artifact = dir.path().join("artifact.json");

        replay(
            capture,
            5,
            interpreter_args(),
            OutputOptions {
                artifact: artifact.clone(),
                export: Some(ExportArgs {
                    name: "demo".to_string(),
                    out_dir: dir.path().to_path_buf(),
                }),
            },
        )
        .await
        .unwrap();

        let saved = std::fs::read_to_string(&artifact).unwrap();
        assert_eq!(saved, "{\"Main/app.js\":\"fixed\",\"Main/lib/a.js\":\"y\"}");
        assert!(dir.path().join("demo.zip").exists());

        let tree = load_tree(&artifact).await.unwrap();
        assert_eq!(tree.content("app.js"), Some("fixed"));
    }

    #[tokio::test]
    async fn export_without_artifact_fails() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("run.sse");
        std::fs::write(
            &capture,
            "data: {\"author\":\"planner_agent\",\"content\":{\"parts\":[{\"text\":\"plan\"}]}}\n\n",
        )
        .unwrap();

        let err = replay(
            capture,
            64,
            interpreter_args(),
            OutputOptions {
                artifact: dir.path().join("artifact.json"),
                export: Some(ExportArgs {
                    name: "demo".to_string(),
                    out_dir: dir.path().to_path_buf(),
                }),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ForgeError::NoArtifact));
        assert!(!dir.path().join("artifact.json").exists());
    }

    #[tokio::test]
    async fn load_tree_reports_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            load_tree(&missing).await,
            Err(ForgeError::Read { .. })
        ));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "not json").unwrap();
        assert!(matches!(
            load_tree(&bad).await,
            Err(ForgeError::Import(_))
        ));
    }
}
