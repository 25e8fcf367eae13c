use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::record::EntityKind;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "healthmate",
    version,
    about = "Browse, compare and export HealthMate history",
    long_about = "HealthMate CLI shows the health-data, assessment and medication-guidance history of the signed-in user, page by page, compares two records and exports the full history as CSV or a printable document.\n\nExamples:\n  healthmate session set 7 --username alice\n  healthmate list assessments --page 2\n  healthmate list health-data --select 12,15\n  healthmate export medications --out-dir ~/exports\n  healthmate print assessments --id 12\n  healthmate delete medications --id 3,4\n\nTip: Use `healthmate init-config` to write ~/.healthmate/config.yml and keep invocations short."
)]
pub struct CliArgs {
    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help_heading = "Output",
        help = "Increase log verbosity (-v info, -vv debug)."
    )]
    pub verbose: u8,

    #[arg(
        long = "no-color",
        global = true,
        help_heading = "Output",
        help = "Disable colored output."
    )]
    pub no_color: bool,

    #[arg(
        short = 'C',
        long = "config",
        value_name = "FILE",
        global = true,
        help_heading = "Config",
        help = "Config file (default: ~/.healthmate/config.yml)."
    )]
    pub config: Option<String>,

    #[arg(
        long = "base-url",
        value_name = "URL",
        env = "HEALTHMATE_API_BASE_URL",
        global = true,
        help_heading = "Backend",
        help = "API base URL (default: http://localhost:8080)."
    )]
    pub base_url: Option<String>,

    #[arg(
        long = "user-id",
        value_name = "ID",
        global = true,
        help_heading = "Backend",
        help = "Act as this user instead of the signed-in one."
    )]
    pub user_id: Option<i64>,

    #[arg(
        long = "timeout",
        value_name = "SECS",
        global = true,
        help_heading = "Backend",
        help = "Request timeout in seconds (default: 10)."
    )]
    pub timeout: Option<u64>,

    #[arg(
        long = "proxy",
        value_name = "URL",
        global = true,
        help_heading = "Backend",
        help = "Send requests through this proxy."
    )]
    pub proxy: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewArg {
    #[value(alias = "data")]
    HealthData,
    #[value(alias = "assessment")]
    Assessments,
    #[value(alias = "medication")]
    Medications,
}

impl From<ViewArg> for EntityKind {
    fn from(value: ViewArg) -> Self {
        match value {
            ViewArg::HealthData => EntityKind::HealthData,
            ViewArg::Assessments => EntityKind::Assessment,
            ViewArg::Medications => EntityKind::Medication,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show one page of a history view.
    List(ListArgs),
    /// Show every field of one record.
    Show(ShowArgs),
    /// Delete one or more records (asks for confirmation).
    Delete(DeleteArgs),
    /// Export the whole history as CSV.
    Export(ExportArgs),
    /// Write a printable document and open it in the browser.
    Print(PrintArgs),
    /// Inspect or change the signed-in user.
    #[command(subcommand)]
    Session(SessionCommand),
    /// Write a commented default config file.
    InitConfig,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    #[arg(value_enum, value_name = "VIEW")]
    pub view: ViewArg,

    #[arg(
        short = 'p',
        long = "page",
        value_name = "N",
        default_value_t = 1,
        help = "Page to show (clamped to the last page)."
    )]
    pub page: usize,

    #[arg(long = "page-size", value_name = "N", help = "Rows per page (default: 10).")]
    pub page_size: Option<usize>,

    #[arg(
        short = 's',
        long = "select",
        value_name = "ID,ID",
        help = "Select up to two records, in order, and show their difference."
    )]
    pub select: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ShowArgs {
    #[arg(value_enum, value_name = "VIEW")]
    pub view: ViewArg,

    #[arg(value_name = "ID")]
    pub id: i64,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    #[arg(value_enum, value_name = "VIEW")]
    pub view: ViewArg,

    #[arg(value_name = "ID", required_unless_present = "ids", conflicts_with = "ids")]
    pub id: Option<i64>,

    #[arg(
        long = "id",
        value_name = "ID,ID",
        help = "Delete several records behind one confirmation."
    )]
    pub ids: Option<String>,

    #[arg(short = 'y', long = "yes", help = "Do not ask for confirmation.")]
    pub yes: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    #[arg(value_enum, value_name = "VIEW")]
    pub view: ViewArg,

    #[arg(
        short = 'o',
        long = "out-dir",
        value_name = "DIR",
        help = "Directory for the CSV file (default: export_dir or .)."
    )]
    pub out_dir: Option<String>,

    #[arg(long = "no-bom", help = "Omit the UTF-8 byte order mark.")]
    pub no_bom: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PrintArgs {
    #[arg(value_enum, value_name = "VIEW")]
    pub view: ViewArg,

    #[arg(long = "id", value_name = "ID,ID", help = "Only print these records.")]
    pub ids: Option<String>,

    #[arg(
        short = 'o',
        long = "out-dir",
        value_name = "DIR",
        help = "Directory for the document (default: export_dir or .)."
    )]
    pub out_dir: Option<String>,

    #[arg(long = "no-open", help = "Write the document without opening a browser.")]
    pub no_open: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommand {
    /// Show the signed-in user.
    Show,
    /// Sign in as a user.
    Set(SessionSetArgs),
    /// Sign out.
    Clear,
}

#[derive(Args, Debug, Clone)]
pub struct SessionSetArgs {
    #[arg(value_name = "USER_ID")]
    pub user_id: i64,

    #[arg(long = "username", value_name = "NAME", default_value = "")]
    pub username: String,

    #[arg(long = "email", value_name = "EMAIL")]
    pub email: Option<String>,

    #[arg(long = "full-name", value_name = "NAME")]
    pub full_name: Option<String>,

    #[arg(long = "role", value_name = "ROLE")]
    pub role: Option<String>,
}
