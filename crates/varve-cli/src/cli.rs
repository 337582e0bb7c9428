use clap::{Parser, Subcommand, Args};

#[derive(Parser)]
#[command(
    name = "varve",
    about = "Versioned in-memory object store with undo, inverses, and exports",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compile a schema file and report its type universe
    Validate(ValidateArgs),
    /// Apply an operation script and print the change history
    Run(RunArgs),
    /// Apply an operation script and emit the final state as export records
    Export(ExportArgs),
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Schema file: a JSON array of type descriptors
    #[arg(long)]
    pub schema: String,
}

#[derive(Args)]
pub struct RunArgs {
    /// Schema file: a JSON array of type descriptors
    #[arg(long)]
    pub schema: String,
    /// Script file: a JSON array of operations
    #[arg(long)]
    pub script: String,
    /// Also print the entity-level difference from genesis to the final state
    #[arg(long)]
    pub diff: bool,
}

#[derive(Args)]
pub struct ExportArgs {
    /// Schema file: a JSON array of type descriptors
    #[arg(long)]
    pub schema: String,
    /// Script file: a JSON array of operations
    #[arg(long)]
    pub script: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_validate() {
        let cli = Cli::try_parse_from(["varve", "validate", "--schema", "types.json"]).unwrap();
        if let Command::Validate(args) = cli.command {
            assert_eq!(args.schema, "types.json");
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_run() {
        let cli = Cli::try_parse_from([
            "varve", "run", "--schema", "types.json", "--script", "ops.json",
        ])
        .unwrap();
        if let Command::Run(args) = cli.command {
            assert_eq!(args.schema, "types.json");
            assert_eq!(args.script, "ops.json");
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_run_with_diff() {
        let cli = Cli::try_parse_from([
            "varve", "run", "--schema", "t.json", "--script", "o.json", "--diff",
        ])
        .unwrap();
        if let Command::Run(args) = cli.command {
            assert!(args.diff);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_export() {
        let cli = Cli::try_parse_from([
            "varve", "export", "--schema", "types.json", "--script", "ops.json",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Export(_)));
    }

    #[test]
    fn run_requires_script() {
        assert!(Cli::try_parse_from(["varve", "run", "--schema", "types.json"]).is_err());
    }

    #[test]
    fn parse_verbose() {
        let cli = Cli::try_parse_from(["varve", "--verbose", "validate", "--schema", "s.json"])
            .unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn parse_json_format() {
        let cli = Cli::try_parse_from([
            "varve", "--format", "json", "validate", "--schema", "s.json",
        ])
        .unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
    }

    #[test]
    fn format_defaults_to_text() {
        let cli = Cli::try_parse_from(["varve", "validate", "--schema", "s.json"]).unwrap();
        assert!(matches!(cli.format, OutputFormat::Text));
    }
}
