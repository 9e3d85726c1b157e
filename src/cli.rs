//! Command-line argument parsing for the tzfailover binary

/// Parsed command line arguments
pub struct Args {
    pub validate: bool,
    pub help: bool,
}

pub fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    parse_arg_list(&args)
}

pub fn parse_arg_list(args: &[String]) -> Args {
    let mut result = Args {
        validate: false,
        help: false,
    };

    for arg in args.iter().skip(1) {
        match arg.as_str() {
            "--validate" => result.validate = true,
            "--help" | "-h" => result.help = true,
            _ => {}
        }
    }

    result
}

pub fn print_help() {
    println!("tzfailover - time-zone provider failover controller\n");
    println!("USAGE:");
    println!("    tzfailover [OPTIONS]\n");
    println!("OPTIONS:");
    println!("    --validate          Validate configuration and exit");
    println!("    --help, -h          Show this help message\n");
    println!("COMMANDS (read from stdin):");
    println!("    <provider> success <zone[,zone...]|->   Inject a certain event");
    println!("    <provider> uncertain                    Inject an uncertain event");
    println!("    <provider> failure                      Inject a permanent failure");
    println!("    geo on|off                              Toggle geo detection");
    println!("    user <id>                               Switch the current user");
    println!("    dump                                    Print a controller snapshot");
    println!("    quit                                    Exit\n");
    println!("ENVIRONMENT:");
    println!("    UNCERTAINTY_DELAY_MS, PROVIDER_INIT_TIMEOUT_MS,");
    println!("    PROVIDER_INIT_TIMEOUT_FUZZ_MS, PRIMARY_PROVIDER_NAME,");
    println!("    SECONDARY_PROVIDER_NAME, INITIAL_USER_ID, GEO_DETECTION_ENABLED");
}
