use std::process::ExitCode;

pub type CliResult<T> = anyhow::Result<T>;

/// Exit status used when a reply did not arrive in time, as timeout(1) does
const TIMEOUT_EXIT_CODE: u8 = 124;

/// Convert a CliResult to an ExitCode, printing errors to stderr
pub fn to_exit_code(result: CliResult<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            for cause in e.chain().skip(1) {
                eprintln!("  caused by: {cause}");
            }
            let timed_out = e.chain().any(|cause| {
                matches!(
                    cause.downcast_ref::<tether::Error>(),
                    Some(tether::Error::Timeout(_))
                )
            });
            if timed_out {
                ExitCode::from(TIMEOUT_EXIT_CODE)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
