//! Module containing terminal utilities

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns true when stdout is a TTY whose terminal is expected to render ANSI escapes.
///
/// A `TERM` of `dumb` or a set `NO_COLOR` disables styling even on a TTY.
pub fn is_ansi_interactive_terminal() -> bool {
    let stdout_is_tty = unsafe { libc::isatty(libc::STDOUT_FILENO) == 1 };
    if !stdout_is_tty {
        return false;
    }

    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }

    match std::env::var("TERM") {
        Ok(term) => term != "dumb",
        Err(_) => {
            tracing::debug!("detected TTY without TERM environment variable");
            true
        }
    }
}
