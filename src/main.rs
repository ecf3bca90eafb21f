//! Tutor chat - terminal client for the subject tutoring service
//!
//! Usage: `tutor-chat [subject-slug]`. Lines typed at the prompt are asked as
//! questions; lines starting with `/` are commands.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tutor_chat::{
    ClientConfig, ConversationEngine, ConversationEvent, ConversationRegistry,
    HttpTransport, LoggingTransport, Message, Persistence, Role, SqliteKv, TurnError,
};

type Transport = Arc<LoggingTransport<HttpTransport>>;

const HELP: &str = "Commands: /clear, /history, /subject <slug>, /subjects, /help, /quit. \
                    Ctrl-C stops an answer, or quits at the prompt.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so they never interleave with answers
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tutor_chat=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ClientConfig::from_env();
    let Some(mut slug) = std::env::args().nth(1).or_else(|| config.subject.clone()) else {
        eprintln!("Usage: tutor-chat <subject-slug>  (or set TUTOR_SUBJECT)");
        std::process::exit(2);
    };

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::info!(path = %config.db_path.display(), "Opening history database");
    let kv = SqliteKv::open(&config.db_path)?;

    let transport: Transport = Arc::new(LoggingTransport::new(HttpTransport::new(
        &config.backend_url,
        config.connect_timeout,
        config.request_timeout,
    )?));
    tracing::info!(
        backend = %config.backend_url,
        streaming = config.streaming,
        "Transport ready"
    );

    let registry = ConversationRegistry::new(
        transport,
        Persistence::new(Arc::new(kv)),
        config.engine_options(),
    );

    let mut engine = registry.engine(&slug);
    println!("Subject: {slug}. {HELP}");
    print_history(&engine.messages());

    // Ctrl-C stops an answer, or quits when idle
    let mut interrupts = spawn_interrupt_listener(tokio::signal::ctrl_c);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt(&slug);
        let line = tokio::select! {
            line = lines.next_line() => line?,
            Some(()) = interrupts.recv() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').map_or((line, ""), |(cmd, rest)| (cmd, rest.trim())) {
            ("/quit" | "/exit", _) => break,
            ("/help", _) => println!("{HELP}"),
            ("/clear", _) => {
                engine.clear();
                println!("Conversation cleared.");
            }
            ("/history", _) => print_history(&engine.messages()),
            ("/subjects", _) => println!("{}", registry.known_slugs().join(", ")),
            ("/subject", "") => println!("Usage: /subject <slug>"),
            ("/subject", next) => {
                slug = next.to_string();
                engine = registry.engine(&slug);
                println!("Subject: {slug}.");
                print_history(&engine.messages());
            }
            (cmd, _) if cmd.starts_with('/') => println!("Unknown command {cmd}. {HELP}"),
            _ => ask(&engine, line, &mut interrupts).await,
        }
    }

    Ok(())
}

/// Forward every signal from `signal` for the rest of the session.
///
/// The first `ctrl_c()` call replaces the default SIGINT handler, so a single
/// long-lived listener has to serve both the prompt and in-flight answers.
fn spawn_interrupt_listener<F, Fut>(signal: F) -> mpsc::UnboundedReceiver<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = std::io::Result<()>> + Send,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while signal().await.is_ok() {
            if tx.send(()).is_err() {
                break;
            }
        }
    });
    rx
}

fn prompt(slug: &str) {
    print!("[{slug}]> ");
    let _ = std::io::stdout().flush();
}

/// Submit one question, echoing the answer as it streams in
async fn ask(
    engine: &ConversationEngine<Transport>,
    question: &str,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
) {
    let mut updates = engine.subscribe();
    let mut shown = String::new();

    let turn = engine.submit(question);
    tokio::pin!(turn);
    let result = loop {
        tokio::select! {
            result = &mut turn => break result,
            update = updates.recv() => {
                if let Ok(event) = update {
                    render(&event, &mut shown);
                }
            }
            Some(()) = interrupts.recv() => {
                if engine.cancel() {
                    eprintln!("\n(stopped)");
                }
            }
        }
    };
    // Updates committed just before the turn ended
    while let Ok(event) = updates.try_recv() {
        render(&event, &mut shown);
    }
    println!();

    match result {
        Ok(summary) => {
            if let Some(answer) = engine
                .messages()
                .into_iter()
                .find(|m| m.id == summary.assistant_id)
            {
                print_sources(&answer);
            }
        }
        Err(TurnError::Remote(_)) => {}
        Err(e) => eprintln!("({e})"),
    }
}

/// Print whatever part of the answer has not been shown yet
fn render(event: &ConversationEvent, shown: &mut String) {
    let ConversationEvent::Updated(message) = event else {
        return;
    };
    if message.role != Role::Assistant || message.content == *shown {
        return;
    }
    match message.content.strip_prefix(shown.as_str()) {
        Some(delta) => print!("{delta}"),
        None => print!("\n{}", message.content),
    }
    let _ = std::io::stdout().flush();
    shown.clone_from(&message.content);
}

fn print_sources(message: &Message) {
    if message.sources.is_empty() {
        return;
    }
    println!("Sources:");
    for source in &message.sources {
        println!("  - {} ({}, score {:.2})", source.label(), source.source_file, source.score);
    }
}

fn print_history(messages: &[Message]) {
    for message in messages {
        let who = match message.role {
            Role::User => "you",
            Role::Assistant => "tutor",
        };
        println!("{who}: {}", message.content);
        if message.role == Role::Assistant {
            print_sources(message);
        }
    }
}
