//! Severity-classified diagnostics with per-pass suppression.
//!
//! Messages are printed at the point of detection in the conventional
//! `file:line: message` shape so editors and IDEs can jump to them; the
//! call chain only carries the [`Reported`] marker back up.

/// Marker: a diagnostic was already emitted for this failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reported;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Fatal,
    Error,
    /// Configuration/state diagnostics, shown in pass 1 only.
    Warn1,
    /// Address/layout diagnostics, shown in pass 2 only.
    Warn2,
    /// Informational, shown in pass 1 only.
    Info,
    Note,
}

/// Source context attached to a diagnostic.
#[derive(Clone, Debug)]
pub struct SrcCtx {
    pub name: String,
    pub line: u32,
}

#[derive(Debug, Default)]
pub struct Reporter {
    pub pass: u8,
    pub errors: u32,
    pub warnings: u32,
    pub fatal: bool,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, ctx: Option<&SrcCtx>, level: Level, msg: &str) {
        if self.pass == 1 && level == Level::Warn2 {
            return;
        }
        if self.pass == 2 && matches!(level, Level::Info | Level::Warn1) {
            return;
        }

        let prefix = match level {
            Level::Fatal => {
                self.fatal = true;
                self.errors += 1;
                "Fatal Error: "
            }
            Level::Error => {
                self.errors += 1;
                "Error: "
            }
            Level::Warn1 | Level::Warn2 => {
                self.warnings += 1;
                "Warning: "
            }
            Level::Info | Level::Note => "Note: ",
        };

        let loc = match ctx {
            Some(ctx) => format!("{}:{}: ", ctx.name, ctx.line),
            None => String::new(),
        };

        match level {
            Level::Fatal | Level::Error | Level::Warn1 | Level::Warn2 => {
                eprintln!("{}{}{}", loc, prefix, msg);
            }
            Level::Info | Level::Note => {
                println!("{}{}{}", loc, prefix, msg);
            }
        }
    }

    pub fn error(&mut self, ctx: Option<&SrcCtx>, msg: &str) -> Reported {
        self.report(ctx, Level::Error, msg);
        Reported
    }

    pub fn fatal(&mut self, ctx: Option<&SrcCtx>, msg: &str) -> Reported {
        self.report(ctx, Level::Fatal, msg);
        Reported
    }

    pub fn warn1(&mut self, ctx: Option<&SrcCtx>, msg: &str) {
        self.report(ctx, Level::Warn1, msg);
    }

    pub fn warn2(&mut self, ctx: Option<&SrcCtx>, msg: &str) {
        self.report(ctx, Level::Warn2, msg);
    }

    pub fn info(&mut self, ctx: Option<&SrcCtx>, msg: &str) {
        self.report(ctx, Level::Info, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warn2_is_suppressed_in_pass_one() {
        let mut rep = Reporter::new();
        rep.pass = 1;
        rep.warn2(None, "layout");
        assert_eq!(rep.warnings, 0);
        rep.pass = 2;
        rep.warn2(None, "layout");
        assert_eq!(rep.warnings, 1);
    }

    #[test]
    fn warn1_is_suppressed_in_pass_two() {
        let mut rep = Reporter::new();
        rep.pass = 2;
        rep.warn1(None, "state");
        assert_eq!(rep.warnings, 0);
        rep.pass = 1;
        rep.warn1(None, "state");
        assert_eq!(rep.warnings, 1);
    }

    #[test]
    fn fatal_sets_sticky_flag_and_counts_as_error() {
        let mut rep = Reporter::new();
        rep.pass = 1;
        let _ = rep.fatal(None, "out of room");
        assert!(rep.fatal);
        assert_eq!(rep.errors, 1);
    }
}
