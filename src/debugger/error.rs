use super::eval::EvalError;
use super::DebuggerState;
use crate::jdwp;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- generic errors --------------------------------------------
    #[error("debuggee already run")]
    AlreadyRun,
    #[error("operation not allowed in state {0}")]
    UnexpectedState(DebuggerState),
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    #[error(transparent)]
    IO(#[from] std::io::Error),

    // --------------------------------- launch errors ---------------------------------------------
    #[error("invalid launch arguments: {0}")]
    LaunchArgs(String),
    #[error("launch arguments are not a json object: {0}")]
    LaunchArgsFormat(#[from] serde_json::Error),

    // --------------------------------- runtime errors --------------------------------------------
    #[error(transparent)]
    Jdwp(#[from] jdwp::Error),
    #[error("class {0} is not loaded")]
    ClassNotLoaded(String),
    #[error("no suspended thread")]
    NoSuspendedThread,

    // --------------------------------- subsystem errors ------------------------------------------
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Analyze(#[from] crate::analyzer::Error),
    #[error("no live value for symbol {0}")]
    NoSymbolValue(String),
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
