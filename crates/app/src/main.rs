mod input;

use std::fmt;

use quiz_core::model::{AttemptId, DraftAnswer, FilledAnswers, QuizId};
use services::{
    Clock, EngineConfig, ExpiryCallback, QuizSession, QuizSessionService, SessionError,
};
use storage::remote::RemoteConfig;
use storage::repository::{DraftAnswerRepository, Storage};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt as log_fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::input::{HELP, Input, InputError};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidId { flag: &'static str, raw: String },
    InvalidTimeLimit { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidId { flag, raw } => write!(f, "invalid {flag} value: {raw:?}"),
            ArgsError::InvalidTimeLimit { raw } => {
                write!(f, "invalid --time-limit value: {raw} (whole seconds)")
            }
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!(
        "  cargo run -p app -- take   --quiz <id> [--attempt <id>] [--time-limit <secs>] [--db <sqlite_url>]"
    );
    eprintln!("  cargo run -p app -- drafts --quiz <id> --attempt <id> [--db <sqlite_url>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:quiz.sqlite3");
    eprintln!("  --attempt <new random id> (take only)");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  QUIZ_DB_URL, QUIZ_ATTEMPT_ID");
    eprintln!("  QUIZ_API_URL, QUIZ_API_KEY (hosted backend instead of SQLite, unless --db is given)");
    eprintln!("  QUIZ_AUTOSAVE_DEBOUNCE_MS, QUIZ_AUTOSAVE_RETRY_MS, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Take,
    Drafts,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "take" => Some(Self::Take),
            "drafts" => Some(Self::Drafts),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Args {
    db_url: String,
    db_flag: bool,
    quiz_id: QuizId,
    attempt_id: Option<AttemptId>,
    time_limit: Option<u32>,
}

impl Args {
    fn parse(
        cmd: Command,
        args: &mut impl Iterator<Item = String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ArgsError> {
        let mut db_url = env("QUIZ_DB_URL")
            .map_or_else(|| normalize_sqlite_url("sqlite:quiz.sqlite3".into()), normalize_sqlite_url);
        let mut db_flag = false;
        let mut quiz_id = None;
        let mut attempt_id = env("QUIZ_ATTEMPT_ID").and_then(|value| value.parse::<AttemptId>().ok());
        let mut time_limit = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                    db_flag = true;
                }
                "--quiz" => {
                    let value = require_value(args, "--quiz")?;
                    let parsed = value.parse::<QuizId>().map_err(|_| ArgsError::InvalidId {
                        flag: "--quiz",
                        raw: value.clone(),
                    })?;
                    quiz_id = Some(parsed);
                }
                "--attempt" => {
                    let value = require_value(args, "--attempt")?;
                    let parsed = value.parse::<AttemptId>().map_err(|_| ArgsError::InvalidId {
                        flag: "--attempt",
                        raw: value.clone(),
                    })?;
                    attempt_id = Some(parsed);
                }
                "--time-limit" if cmd == Command::Take => {
                    let value = require_value(args, "--time-limit")?;
                    let parsed: u32 = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidTimeLimit { raw: value.clone() })?;
                    time_limit = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        let quiz_id = quiz_id.ok_or(ArgsError::MissingFlag { flag: "--quiz" })?;
        if cmd == Command::Drafts && attempt_id.is_none() {
            return Err(ArgsError::MissingFlag { flag: "--attempt" });
        }

        Ok(Self {
            db_url,
            db_flag,
            quiz_id,
            attempt_id,
            time_limit,
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

/// Hosted backend when configured and no `--db` was passed; `SQLite` otherwise.
async fn open_storage(args: &Args) -> Result<Storage, Box<dyn std::error::Error>> {
    if !args.db_flag {
        if let Some(remote) = RemoteConfig::from_env()? {
            tracing::info!(base_url = %remote.base_url(), "using hosted backend");
            return Ok(Storage::remote(remote));
        }
    }
    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    prepare_sqlite_file(&args.db_url)?;
    tracing::info!(db_url = %args.db_url, "using sqlite storage");
    Ok(Storage::sqlite(&args.db_url).await?)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout belongs to the prompt.
    let stderr_layer = log_fmt::layer().with_writer(std::io::stderr).with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// What the prompt loop should do after a line.
enum Flow {
    Continue,
    Stop,
}

async fn apply(session: &mut QuizSession, input: Input) -> Result<Flow, Box<dyn std::error::Error>> {
    match input {
        Input::Choice { question, option } => {
            session.set_answer(question.clone(), DraftAnswer::multiple_choice(question, option))?;
        }
        Input::TrueFalse { question, value } => {
            session.set_answer(question.clone(), DraftAnswer::true_false(question, value))?;
        }
        Input::Short { question, text } => {
            session.set_answer(question.clone(), DraftAnswer::short_answer(question, text))?;
        }
        Input::Fill {
            question,
            blank,
            text,
        } => {
            let mut filled = match session.answer(&question) {
                Some(DraftAnswer::FillInTheBlank { filled_answers, .. }) => filled_answers,
                _ => FilledAnswers::new(),
            };
            filled.insert(blank, text);
            session.set_answer(question.clone(), DraftAnswer::fill_in_the_blank(question, filled))?;
        }
        Input::Clear(question) => {
            if !session.clear_answer(&question)? {
                println!("{question} has no answer yet");
            }
        }
        Input::Status => print_json(&session.status())?,
        Input::Pause => {
            if !session.pause() {
                println!("timer is {}", session.timer_status());
            }
        }
        Input::Resume => {
            if !session.resume() {
                println!("timer is {}", session.timer_status());
            }
        }
        Input::Blur => {
            let count = session.record_focus_loss();
            println!("focus losses: {count}");
        }
        Input::Save => {
            let outcome = session.force_save().await?;
            println!("save: {outcome:?}");
        }
        Input::Submit => {
            let submission = session.submit().await?;
            print_json(&submission)?;
            return Ok(Flow::Stop);
        }
        Input::Quit => {
            if let Err(err) = session.force_save().await {
                eprintln!("could not save drafts before quitting: {err}");
            }
            return Ok(Flow::Stop);
        }
        Input::Help => println!("{HELP}"),
    }
    Ok(Flow::Continue)
}

async fn take(service: QuizSessionService, args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let attempt_id = args.attempt_id.unwrap_or_else(AttemptId::generate);
    let (expired_tx, mut expired_rx) = mpsc::unbounded_channel();
    let on_expire: ExpiryCallback = Box::new(move || {
        let _ = expired_tx.send(());
    });

    let mut session = match service
        .resume(args.quiz_id, attempt_id.clone(), args.time_limit, Some(on_expire))
        .await
    {
        Ok(session) => session,
        Err(SessionError::AlreadySubmitted) => {
            println!("attempt {attempt_id} was already submitted:");
            if let Some(submission) = service.submission(&attempt_id).await? {
                print_json(&submission)?;
            }
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    println!(
        "quiz {} / attempt {} ({} answers restored)",
        session.quiz_id(),
        session.attempt_id(),
        session.answered_count()
    );
    if let Some(time) = session.status().formatted_time {
        println!("time left: {time}");
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            Some(()) = expired_rx.recv() => {
                println!("time is up, submitting");
                let submission = session.submit().await?;
                print_json(&submission)?;
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    // stdin closed
                    apply(&mut session, Input::Quit).await?;
                    break;
                };
                let input = match Input::parse(&line) {
                    Ok(input) => input,
                    Err(InputError::Empty) => continue,
                    Err(err) => {
                        println!("{err}");
                        continue;
                    }
                };
                match apply(&mut session, input).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Stop) => break,
                    Err(err) => println!("error: {err}"),
                }
            }
        }
    }

    session.dispose();
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None | Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let mut iter = argv.into_iter().skip(1);
    let parsed = Args::parse(cmd, &mut iter, |var| std::env::var(var).ok()).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let config = EngineConfig::from_env()?;
    let storage = open_storage(&parsed).await?;

    match cmd {
        Command::Take => {
            let service = QuizSessionService::from_storage(Clock::default_clock(), storage, config);
            take(service, parsed).await
        }
        Command::Drafts => {
            let Some(attempt_id) = parsed.attempt_id.as_ref() else {
                return Err(ArgsError::MissingFlag { flag: "--attempt" }.into());
            };
            let drafts = storage
                .drafts
                .load_draft_answers(&parsed.quiz_id, attempt_id)
                .await?;
            print_json(&drafts)
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();
    init_tracing();
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
