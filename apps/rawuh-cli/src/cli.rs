use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "rawuh",
    about = "Run attendance sessions against the Rawuh gateway",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Gateway base URL.
    #[arg(long, env = "RAWUH_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Lecturer email or username.
    #[arg(long, env = "RAWUH_IDENTIFIER", global = true)]
    pub identifier: Option<String>,

    #[arg(long, env = "RAWUH_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start a session. Token sessions are watched until Ctrl-C.
    Start {
        #[arg(long = "class")]
        class_id: u64,
        #[arg(long)]
        week: u32,
        /// `token` (rotating QR) or `tokenless` (face recognition).
        #[arg(long, default_value = "token")]
        mode: String,
    },
    /// Close the open session of a class.
    Close {
        #[arg(long = "class")]
        class_id: u64,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    /// List sessions across all classes.
    Sessions {
        #[arg(long, default_value = "all")]
        filter: String,
    },
    /// Show a session roster with its counters.
    Roster {
        #[arg(long = "session")]
        session_id: String,
        /// Also list enrolled students missing from the roster.
        #[arg(long = "class")]
        class_id: Option<u64>,
    },
    /// Record one student's status (p, i, s, a).
    Mark {
        #[arg(long = "session")]
        session_id: String,
        #[arg(long = "student")]
        student_id: u64,
        #[arg(long)]
        status: String,
        /// Fill in names of students missing from the roster snapshot.
        #[arg(long = "class")]
        class_id: Option<u64>,
    },
    /// Show the open session of a class, if any.
    Active {
        #[arg(long = "class")]
        class_id: u64,
    },
}
