//! Advisory classification of free-text CLI responses.
//!
//! Only the two markers below are part of the contract. Other error-looking
//! output (localized messages, `warning:` lines) is not recognised and is
//! reported as [`Classification::Unknown`].

/// Substring the device prints when a request was rejected or is not ready
pub const ERROR_MARKER: &str = "error:";

/// Substring the device prints when a PKI request completed
pub const SUCCESS_MARKER: &str = "successfully";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Ok,
    TransientNotReady,
    TerminalError,
    Unknown,
}

/// How an `error:` marker should be read by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorContext {
    /// Cert bootstrap: the PKI daemon may still be starting
    Polling,
    /// Config changes: any error is final
    Strict,
}

/// Classify a response body. A success marker wins over an error marker.
pub fn classify(output: &str, ctx: ErrorContext) -> Classification {
    if output.contains(SUCCESS_MARKER) {
        Classification::Ok
    } else if output.contains(ERROR_MARKER) {
        match ctx {
            ErrorContext::Polling => Classification::TransientNotReady,
            ErrorContext::Strict => Classification::TerminalError,
        }
    } else {
        Classification::Unknown
    }
}

/// Outcome of a single command sent to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub command: String,
    pub result: String,
    /// Set when the channel itself reported the command as rejected
    pub failed: Option<String>,
}

impl CommandResult {
    pub fn is_failed(&self) -> bool {
        self.failed.is_some()
    }

    pub fn has_error(&self) -> bool {
        self.result.contains(ERROR_MARKER)
    }

    pub fn has_success(&self) -> bool {
        self.result.contains(SUCCESS_MARKER)
    }

    pub fn classification(&self, ctx: ErrorContext) -> Classification {
        if self.is_failed() {
            return Classification::TerminalError;
        }
        classify(&self.result, ctx)
    }
}

/// Ordered results of one command batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiResponse {
    pub responses: Vec<CommandResult>,
}

impl MultiResponse {
    /// All responses joined, one per line, for logs and error messages
    pub fn joined_result(&self) -> String {
        self.responses
            .iter()
            .map(|r| r.result.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn any_error(&self) -> bool {
        self.responses.iter().any(CommandResult::has_error)
    }

    pub fn any_success(&self) -> bool {
        self.responses.iter().any(CommandResult::has_success)
    }

    pub fn first_failed(&self) -> Option<&CommandResult> {
        self.responses.iter().find(|r| r.is_failed())
    }
}
