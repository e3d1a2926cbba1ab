use clap::{Parser, Subcommand};

/// envmatrix - define and run a matrix of Python virtual environments
#[derive(Parser, Debug)]
#[command(name = "envmatrix")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the spec file
    #[arg(short = 'f', long = "file", global = true, default_value = "envmatrix.yml")]
    pub file: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the matched venv instances
    List {
        /// Regular expression matched against instance names and hashes
        #[arg(value_name = "PATTERN", default_value = ".*")]
        pattern: String,

        /// Regular expression matched against the venv identifier chain
        #[arg(long, value_name = "PATTERN", default_value = ".*")]
        venv_pattern: String,

        /// Restrict to these interpreter hints (repeatable)
        #[arg(short = 'p', long = "python", value_name = "HINT")]
        pythons: Vec<String>,

        /// Only print the hashes of matched instances
        #[arg(long, default_value = "false")]
        hash_only: bool,

        /// Print machine-readable JSON instead of lines
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Generate the base virtual environments
    Generate {
        /// Regular expression matched against instance names and hashes
        #[arg(value_name = "PATTERN", default_value = ".*")]
        pattern: String,

        /// Restrict to these interpreter hints (repeatable)
        #[arg(short = 'p', long = "python", value_name = "HINT")]
        pythons: Vec<String>,

        /// Recreate virtual environments that already exist
        #[arg(short = 'r', long, default_value = "false")]
        recreate_venvs: bool,

        /// Skip installing the local development package
        #[arg(short = 's', long, default_value = "false")]
        skip_base_install: bool,
    },

    /// Run the matched instances
    Run {
        /// Regular expression matched against instance names and hashes
        #[arg(value_name = "PATTERN", default_value = ".*")]
        pattern: String,

        /// Regular expression matched against the venv identifier chain
        #[arg(long, value_name = "PATTERN", default_value = ".*")]
        venv_pattern: String,

        /// Restrict to these interpreter hints (repeatable)
        #[arg(short = 'p', long = "python", value_name = "HINT")]
        pythons: Vec<String>,

        /// Recreate virtual environments that already exist
        #[arg(short = 'r', long, default_value = "false")]
        recreate_venvs: bool,

        /// Skip installing the local development package
        #[arg(short = 's', long, default_value = "false")]
        skip_base_install: bool,

        /// Force recompilation of the pinned requirement lockfiles
        #[arg(short = 'c', long, default_value = "false")]
        recompile_requirements: bool,

        /// Forward the full parent environment to the command
        #[arg(long, default_value = "false")]
        pass_env: bool,

        /// Skip instances whose interpreter is not installed
        #[arg(long, default_value = "false")]
        skip_missing: bool,

        /// Stop after the first failing instance
        #[arg(short = 'x', long = "exitfirst", default_value = "false")]
        exit_first: bool,

        /// Extra arguments substituted for `{cmdargs}` in the command
        #[arg(last = true, value_name = "CMDARGS")]
        cmdargs: Vec<String>,
    },

    /// Compile the pinned requirement lockfile for one instance
    Requirements {
        /// Instance identifier: `#N` ordinal or a unique hash prefix
        #[arg(value_name = "IDENT")]
        ident: String,
    },

    /// Launch an interactive shell inside one instance's environment
    Shell {
        /// Instance identifier: `#N` ordinal or a unique hash prefix
        #[arg(value_name = "IDENT")]
        ident: String,

        /// Forward the full parent environment to the shell
        #[arg(long, default_value = "false")]
        pass_env: bool,
    },
}
