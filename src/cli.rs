//! Command-line parsing for the `cosim` binary: a small hand-rolled parser
//! over `std::env::args()`, since the flag set is short and fixed.

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub scenario: String,
    pub until: Option<u64>,
    pub max_loop_iterations: Option<u32>,
    pub rt_factor: Option<f64>,
    pub rt_strict: Option<bool>,
    pub lazy_stepping: Option<bool>,
    pub stop_timeout_secs: Option<f64>,
    #[cfg(feature = "api")]
    pub api_addr: Option<String>,
}

pub fn print_help() {
    println!(
        "cosim - a co-simulation scheduler\n\
         \n\
         USAGE:\n\
         \x20\x20cosim --scenario <path> [OPTIONS]\n\
         \n\
         OPTIONS:\n\
         \x20\x20--scenario <path>            TOML scenario file (required)\n\
         \x20\x20--until <ticks>               Override the scenario's run horizon\n\
         \x20\x20--max-loop-iterations <n>     Override the same-time loop bound\n\
         \x20\x20--rt-factor <f64>             Override real-time pacing factor\n\
         \x20\x20--rt-strict                   Fail on a missed real-time deadline\n\
         \x20\x20--lazy-stepping               Skip idle event-based/hybrid steps\n\
         \x20\x20--no-lazy-stepping            Disable lazy stepping\n\
         \x20\x20--stop-timeout-secs <f64>     Override the graceful-stop timeout on abort\n\
         \x20\x20--api-addr <host:port>        Serve the read-only HTTP API (requires `api` feature)\n\
         \x20\x20-h, --help                    Print this help"
    );
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("missing required --scenario <path>")]
    MissingScenario,
    #[error("unknown argument: {0}")]
    UnknownArgument(String),
    #[error("--{flag} expects a value")]
    MissingValue { flag: String },
    #[error("invalid value for --{flag}: {value}")]
    InvalidValue { flag: String, value: String },
}

pub fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliArgs, CliError> {
    let mut scenario = None;
    let mut until = None;
    let mut max_loop_iterations = None;
    let mut rt_factor = None;
    let mut rt_strict = None;
    let mut lazy_stepping = None;
    let mut stop_timeout_secs = None;
    #[cfg(feature = "api")]
    let mut api_addr = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "--scenario" => scenario = Some(next_value(&mut args, "scenario")?),
            "--until" => until = Some(parse_value(&mut args, "until")?),
            "--max-loop-iterations" => {
                max_loop_iterations = Some(parse_value(&mut args, "max-loop-iterations")?)
            }
            "--rt-factor" => rt_factor = Some(parse_value(&mut args, "rt-factor")?),
            "--rt-strict" => rt_strict = Some(true),
            "--lazy-stepping" => lazy_stepping = Some(true),
            "--no-lazy-stepping" => lazy_stepping = Some(false),
            "--stop-timeout-secs" => {
                stop_timeout_secs = Some(parse_value(&mut args, "stop-timeout-secs")?)
            }
            #[cfg(feature = "api")]
            "--api-addr" => api_addr = Some(next_value(&mut args, "api-addr")?),
            other => return Err(CliError::UnknownArgument(other.to_string())),
        }
    }

    Ok(CliArgs {
        scenario: scenario.ok_or(CliError::MissingScenario)?,
        until,
        max_loop_iterations,
        rt_factor,
        rt_strict,
        lazy_stepping,
        stop_timeout_secs,
        #[cfg(feature = "api")]
        api_addr,
    })
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, CliError> {
    args.next().ok_or_else(|| CliError::MissingValue {
        flag: flag.to_string(),
    })
}

fn parse_value<T: std::str::FromStr>(
    args: &mut impl Iterator<Item = String>,
    flag: &str,
) -> Result<T, CliError> {
    let raw = next_value(args, flag)?;
    raw.parse().map_err(|_| CliError::InvalidValue {
        flag: flag.to_string(),
        value: raw,
    })
}
