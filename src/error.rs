use miette::Diagnostic;
use thiserror::Error;

pub const TROUBLESHOOTING_URL: &str =
    "https://cloud.google.com/compute/docs/troubleshooting/troubleshooting-ssh";

#[derive(Debug, Error, Diagnostic)]
pub enum GshError {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("invalid argument: {message}")]
    Argument { message: String },

    #[error("could not SSH into the instance: {message}")]
    #[diagnostic(help(
        "it is possible that your SSH key has not propagated to the instance yet; try again in a few seconds"
    ))]
    Network { message: String },

    #[error("could not add SSH key to project metadata of {project}: {message}")]
    SetProjectMetadata { project: String, message: String },

    #[error("[{command}] exited with return code [{code}]")]
    #[diagnostic(help("see {TROUBLESHOOTING_URL} for troubleshooting hints"))]
    Command { command: String, code: i32 },

    #[error("{resource}: {message}")]
    Api {
        resource: String,
        status: Option<u16>,
        message: String,
    },

    #[error("account service: {message}")]
    AccountService { message: String },

    #[error("ssh key error: {message}")]
    Key { message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl GshError {
    pub(crate) fn argument(message: impl Into<String>) -> Self {
        GshError::Argument {
            message: message.into(),
        }
    }
}
