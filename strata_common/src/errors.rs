//! Error-display helpers.
//!
//! Long-running daemons report errors through log lines, where a bare
//! `Display` impl loses the cause chain that actually explains what went
//! wrong. These helpers render the whole chain in one log-friendly value.

use std::fmt;

use anyhow::Error;

/// Support for displaying an error with a complete list of causes, and an
/// optional backtrace.
pub trait DisplayCausesAndBacktraceExt {
    /// Display the error and its causes, plus a backtrace (if captured).
    fn display_causes_and_backtrace(&self) -> DisplayCauses<'_>;

    /// Display the error and its causes.
    fn display_causes_without_backtrace(&self) -> DisplayCauses<'_>;
}

impl DisplayCausesAndBacktraceExt for Error {
    fn display_causes_and_backtrace(&self) -> DisplayCauses<'_> {
        DisplayCauses {
            err: self,
            show_backtrace: true,
        }
    }

    fn display_causes_without_backtrace(&self) -> DisplayCauses<'_> {
        DisplayCauses {
            err: self,
            show_backtrace: false,
        }
    }
}

/// Helper type used to display errors.
pub struct DisplayCauses<'a> {
    err: &'a Error,
    show_backtrace: bool,
}

impl fmt::Display for DisplayCauses<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.err)?;
        for cause in self.err.chain().skip(1) {
            writeln!(f, "  caused by: {}", cause)?;
        }
        if self.show_backtrace {
            write!(f, "{}", self.err.backtrace())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn displays_the_full_cause_chain() {
        let err = Err::<(), Error>(anyhow::anyhow!("disk on fire"))
            .context("could not load attempt 7")
            .unwrap_err();
        let displayed = format!("{}", err.display_causes_without_backtrace());
        assert!(displayed.contains("could not load attempt 7"));
        assert!(displayed.contains("caused by: disk on fire"));
    }
}
