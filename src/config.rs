use crate::archive::DEFAULT_ARCHIVE_NAME;
use crate::client::ClientConfig;
use crate::interpreter::{
    DEFAULT_DELEGATION_ARG, DEFAULT_DELEGATION_TOOL, DEFAULT_PRODUCER_ROLES, EventInterpreter,
};
use clap::Args;
use std::path::PathBuf;

pub const DEFAULT_ARTIFACT_PATH: &str = "forge-artifact.json";

/// Where the agent process lives and which session to run in.
#[derive(Debug, Clone, Args)]
pub struct UpstreamArgs {
    /// Base URL of the agent process
    #[arg(long, env = "FORGE_AGENT_URL", default_value = "http://localhost:8000")]
    pub agent_url: String,

    /// Agent application name
    #[arg(long, env = "FORGE_APP", default_value = "sdlc_cycle")]
    pub app: String,

    #[arg(long, env = "FORGE_USER", default_value = "user1")]
    pub user: String,

    /// Session id; a fresh one is generated when omitted
    #[arg(long, env = "FORGE_SESSION")]
    pub session: Option<String>,
}

impl UpstreamArgs {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.agent_url.clone(),
            app_name: self.app.clone(),
            user_id: self.user.clone(),
            session_id: self
                .session
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        }
    }
}

/// How events are classified.
#[derive(Debug, Clone, Args)]
pub struct InterpreterArgs {
    /// Agent names whose tool results are code artifacts
    #[arg(
        long = "producer",
        env = "FORGE_PRODUCERS",
        value_delimiter = ',',
        default_values_t = DEFAULT_PRODUCER_ROLES.map(String::from)
    )]
    pub producers: Vec<String>,

    /// Function name that hands control to another agent
    #[arg(long, env = "FORGE_DELEGATION_TOOL", default_value = DEFAULT_DELEGATION_TOOL)]
    pub delegation_tool: String,

    /// Argument of the delegation call naming the target agent
    #[arg(long, default_value = DEFAULT_DELEGATION_ARG)]
    pub delegation_arg: String,
}

impl InterpreterArgs {
    pub fn interpreter(&self) -> EventInterpreter {
        EventInterpreter::new(
            self.producers.clone(),
            self.delegation_tool.clone(),
            self.delegation_arg.clone(),
        )
    }
}

#[derive(Debug, Clone, Args)]
pub struct ExportArgs {
    /// Archive name, written as <name>.zip
    #[arg(long, default_value = DEFAULT_ARCHIVE_NAME)]
    pub name: String,

    /// Directory the archive is written to
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        upstream: UpstreamArgs,
        #[command(flatten)]
        interpreter: InterpreterArgs,
        #[command(flatten)]
        export: ExportArgs,
    }

    #[test]
    fn defaults_match_the_agent_conventions() {
        let cli = TestCli::try_parse_from(["forge"]).unwrap();
        assert_eq!(cli.upstream.app, "sdlc_cycle");
        assert_eq!(
            cli.interpreter.producers,
            vec!["coder_agent", "fixer_agent", "coder", "fixer"]
        );
        assert_eq!(cli.interpreter.delegation_tool, "transfer_to_agent");
        assert_eq!(cli.export.name, "project-files");

        let config = cli.upstream.client_config();
        assert!(!config.session_id.is_empty());
    }

    #[test]
    fn producers_accept_a_comma_list() {
        let cli = TestCli::try_parse_from(["forge", "--producer", "builder,patcher", "--session", "s1"])
            .unwrap();
        assert_eq!(cli.interpreter.producers, vec!["builder", "patcher"]);
        assert_eq!(cli.upstream.client_config().session_id, "s1");
    }
}
