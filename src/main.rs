use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use civicrm_client::import::{CsvRecordSource, ImportParameters, Importer, NoteMode, WorkerPool, run_import};
use civicrm_client::remote::{RestConfig, RetryPolicy, ShellConfig};
use civicrm_client::{Civi, CiviError, CiviResult, UpdatePolicy, init_logger};

#[derive(Parser, Debug)]
#[command(name = "civi-import", about = "Bulk import CSV data into CiviCRM", version)]
struct Args {
    /// Append log output to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// How to reach CiviCRM.
    #[arg(long, value_enum, default_value_t = Transport::Rest, global = true)]
    transport: Transport,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Transport {
    /// HTTP REST endpoint configured by CIVI_URL, CIVI_SITE_KEY and CIVI_API_KEY.
    Rest,
    /// Local drush configured by CIVI_DRUSH_PATH, CIVI_DRUSH_ROOT and CIVI_DRUSH_SITE.
    Drush,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the API answers.
    Probe,
    /// Import a delimited file with one of the importers.
    Import(ImportArgs),
}

#[derive(clap::Args, Debug)]
struct ImportArgs {
    /// entities, contacts-dupe-check, contributions, recurring-contributions,
    /// campaigns, notes, addresses, emails, phones, websites, prefixes,
    /// greetings, memberships, entity-tags, contact-groups or delete.
    importer: Importer,

    /// Input file with a header row.
    csv: PathBuf,

    /// Worker threads (default: CIVI_IMPORT_WORKERS or the CPU count).
    #[arg(long)]
    workers: Option<usize>,

    /// update, fill or replace (default: fill for contacts-dupe-check, update otherwise).
    #[arg(long)]
    update_mode: Option<UpdatePolicy>,

    #[arg(long)]
    entity_type: Option<String>,

    /// Identifying column; repeat for several.
    #[arg(long = "identifier")]
    identifiers: Vec<String>,

    #[arg(long, default_value_t = ',')]
    delimiter: char,

    /// Contact id for contributions whose contact is unknown.
    #[arg(long)]
    fallback_contact: Option<i64>,

    #[arg(long, default_value = "title")]
    campaign_identifier: String,

    #[arg(long, default_value = "Main")]
    location_type: String,

    #[arg(long, default_value = "Phone")]
    phone_type: String,

    #[arg(long)]
    entity_table: Option<String>,

    /// add, or replace-subject to overwrite notes with the same subject.
    #[arg(long, default_value = "add")]
    note_mode: NoteMode,

    /// Leave existing addresses, emails, phones and prefixes untouched.
    #[arg(long)]
    no_update: bool,

    /// Allow several memberships, emails, phones or websites per contact.
    #[arg(long)]
    multiple: bool,

    /// Do not warn about unidentified records.
    #[arg(long)]
    silent: bool,
}

impl ImportArgs {
    fn parameters(&self) -> ImportParameters {
        ImportParameters {
            entity_type: self.entity_type.clone(),
            update_policy: self.update_mode,
            identifiers: (!self.identifiers.is_empty()).then(|| self.identifiers.clone()),
            fallback_contact: self.fallback_contact,
            campaign_identifier: self.campaign_identifier.clone(),
            location_type: self.location_type.clone(),
            phone_type: self.phone_type.clone(),
            entity_table: self.entity_table.clone(),
            no_update: self.no_update,
            multiple: self.multiple,
            note_mode: self.note_mode,
            silent: self.silent,
        }
    }
}

fn connect(transport: Transport) -> CiviResult<Civi> {
    match transport {
        Transport::Rest => Civi::rest(RestConfig::from_env()?, RetryPolicy::from_env()),
        Transport::Drush => Ok(Civi::drush(ShellConfig::from_env())),
    }
}

fn run(args: Args) -> CiviResult<bool> {
    let civi = connect(args.transport)?;

    match args.command {
        Command::Probe => {
            let reachable = civi.probe();
            if reachable {
                log::info!("CiviCRM API is reachable");
            } else {
                log::error!("CiviCRM API did not answer");
            }
            Ok(reachable)
        }
        Command::Import(import) => {
            let delimiter = u8::try_from(import.delimiter).map_err(|_| {
                CiviError::Config(format!(
                    "delimiter '{}' is not a single-byte character",
                    import.delimiter
                ))
            })?;
            let params = import.parameters();
            let pool = match import.workers {
                Some(workers) => WorkerPool::from_env().with_workers(workers),
                None => WorkerPool::from_env(),
            };
            let source = CsvRecordSource::open(&import.csv, delimiter)?;
            let summary = run_import(&civi, import.importer, source, &params, &pool);
            println!("{summary}");
            Ok(summary.pool.failed == 0)
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(err) = init_logger(args.log_file.as_deref()) {
        eprintln!("error: cannot open log file: {err}");
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            log::error!("{err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
