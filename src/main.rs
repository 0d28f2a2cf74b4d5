//! River - 债务协商对话智能体
//!
//! 入口：加载配置、初始化日志、构建编排器，在终端中逐行对话。

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use river::agent::build_orchestrator;
use river::config::{load_config, AppConfig};
use river::core::{AgentError, TurnEvent, TurnRequest};
use river::memory::{Message, Role};
use river::prompt;
use river::tools::ProfileStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "river")]
#[command(about = "River - debt resolution conversational agent")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file (defaults to config/default.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// User id whose profile drives the persona
    #[arg(short, long)]
    user: Option<String>,
}

/// REPL 内以 `/` 开头的命令
#[derive(Debug, PartialEq, Eq)]
enum ReplCommand<'a> {
    Quit,
    Help,
    Reset,
    History,
    Users,
    SwitchUser(&'a str),
    Usage,
    Unknown(&'a str),
}

fn parse_command(input: &str) -> Option<ReplCommand<'_>> {
    let rest = input.strip_prefix('/')?;
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    Some(match name {
        "quit" | "exit" => ReplCommand::Quit,
        "help" => ReplCommand::Help,
        "reset" => ReplCommand::Reset,
        "history" => ReplCommand::History,
        "users" => ReplCommand::Users,
        "user" if !arg.is_empty() => ReplCommand::SwitchUser(arg),
        "usage" => ReplCommand::Usage,
        _ => ReplCommand::Unknown(input),
    })
}

fn print_help() {
    println!("commands: /history    show this thread's stored messages");
    println!("          /reset      clear this thread's history");
    println!("          /users      list known user profiles");
    println!("          /user <id>  switch to another user's persona and thread");
    println!("          /usage      show token usage for this session");
    println!("          /quit       exit");
}

/// 启动时的续接提示；历史读取失败作为 Err 返回，由调用方打到 stderr
fn resume_notice(stored: Result<Vec<Message>, AgentError>) -> Result<Option<String>, String> {
    match stored {
        Ok(h) if h.is_empty() => Ok(None),
        Ok(h) => Ok(Some(format!("(resuming {} stored messages)", h.len()))),
        Err(e) => Err(format!("error: failed to read stored history: {e}")),
    }
}

/// 当前对话对象：用户、会话与人设提示词
struct Session {
    user_id: String,
    thread_id: String,
    system_prompt: String,
    greeting: String,
}

async fn open_session(cfg: &AppConfig, profiles: &ProfileStore, user_id: &str) -> Session {
    let (system_prompt, greeting) = match profiles.get(user_id).await {
        Ok(profile) => (prompt::system_prompt(user_id, &profile), prompt::greeting(&profile)),
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "profile unavailable, using generic persona");
            (
                prompt::generic_system_prompt(),
                "Hello. I'm River from Riverline AI. I'm here to help. How are you?".to_string(),
            )
        }
    };
    Session {
        user_id: user_id.to_string(),
        thread_id: cfg.app.thread_id_for(user_id),
        system_prompt,
        greeting,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config).context("failed to load configuration")?;
    river::observability::init(cfg.app.log_format);

    let orchestrator = build_orchestrator(&cfg).await.context("failed to build agent")?;
    let profiles = ProfileStore::new(&cfg.app.profile_path);
    let user_id = cli.user.unwrap_or_else(|| cfg.app.default_user.clone());
    let mut session = open_session(&cfg, &profiles, &user_id).await;

    println!("River ({}), thread {}. Type /help for commands.", cfg.llm.model, session.thread_id);
    match resume_notice(orchestrator.history(&session.thread_id).await) {
        Ok(Some(notice)) => println!("{notice}"),
        Ok(None) => {}
        Err(e) => eprintln!("{e}"),
    }
    println!("\nRiver: {}\n", session.greeting);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You: ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if let Some(command) = parse_command(input) {
            match command {
                ReplCommand::Quit => break,
                ReplCommand::Help => print_help(),
                ReplCommand::Reset => match orchestrator.reset(&session.thread_id).await {
                    Ok(()) => println!("(history cleared)"),
                    Err(e) => eprintln!("error: {e}"),
                },
                ReplCommand::History => match orchestrator.history(&session.thread_id).await {
                    Ok(history) => {
                        for m in history {
                            let label = match m.role {
                                Role::Tool => format!("tool[{}]", m.tool_call_id.as_deref().unwrap_or("?")),
                                role => role.as_str().to_string(),
                            };
                            let calls: Vec<&str> = m.tool_calls.iter().map(|c| c.name.as_str()).collect();
                            if calls.is_empty() {
                                println!("  {label}: {}", m.content);
                            } else {
                                println!("  {label}: {} -> calls {}", m.content, calls.join(", "));
                            }
                        }
                    }
                    Err(e) => eprintln!("error: {e}"),
                },
                ReplCommand::Users => match profiles.list().await {
                    Ok(users) => {
                        for (id, p) in users {
                            let marker = if id == session.user_id { "*" } else { " " };
                            println!(
                                " {marker} {id}: {} ({} {}, risk {})",
                                p.name,
                                p.currency,
                                p.outstanding_debt,
                                p.risk_score_display()
                            );
                        }
                    }
                    Err(e) => eprintln!("error: {e}"),
                },
                ReplCommand::SwitchUser(id) => {
                    session = open_session(&cfg, &profiles, id).await;
                    println!("(switched to {}, thread {})", session.user_id, session.thread_id);
                    println!("\nRiver: {}\n", session.greeting);
                }
                ReplCommand::Usage => {
                    let (prompt_tokens, completion_tokens, total) = orchestrator.token_usage();
                    println!("tokens: prompt {prompt_tokens}, completion {completion_tokens}, total {total}");
                }
                ReplCommand::Unknown(cmd) => println!("unknown command {cmd}, type /help"),
            }
            continue;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = TurnRequest::new(&session.thread_id, input)
            .with_system_prompt(&session.system_prompt)
            .with_event_tx(&tx);
        let result = orchestrator.run(request).await;
        drop(tx);
        while let Some(ev) = rx.recv().await {
            if let TurnEvent::ToolCall { tool, args } = ev {
                println!("  [tool] {tool} {args}");
            }
        }
        match result {
            Ok(outcome) => println!("\nRiver: {}\n", outcome.reply),
            // 持久化失败必须让用户看到
            Err(e) => eprintln!("\nerror: {e}\n"),
        }
    }

    println!("Goodbye.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from(["river", "-c", "conf/dev.toml", "--user", "user_456"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("conf/dev.toml")));
        assert_eq!(cli.user.as_deref(), Some("user_456"));

        let cli = Cli::try_parse_from(["river"]).unwrap();
        assert!(cli.config.is_none() && cli.user.is_none());
    }

    #[test]
    fn test_cli_rejects_unknown_flag_and_missing_value() {
        assert!(Cli::try_parse_from(["river", "--verbose"]).is_err());
        assert!(Cli::try_parse_from(["river", "--config"]).is_err());
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("/exit"), Some(ReplCommand::Quit));
        assert_eq!(parse_command("/user  user_789 "), Some(ReplCommand::SwitchUser("user_789")));
        assert_eq!(parse_command("/user"), Some(ReplCommand::Unknown("/user")));
        assert_eq!(parse_command("/usage"), Some(ReplCommand::Usage));
        assert_eq!(parse_command("/nope"), Some(ReplCommand::Unknown("/nope")));
    }

    #[test]
    fn test_resume_notice_reports_store_errors() {
        assert_eq!(resume_notice(Ok(Vec::new())), Ok(None));
        assert_eq!(
            resume_notice(Ok(vec![Message::user("hi"), Message::assistant("hello")])),
            Ok(Some("(resuming 2 stored messages)".to_string()))
        );
        let err = resume_notice(Err(AgentError::Persistence(river::memory::StoreError::Task(
            "disk unavailable".into(),
        ))))
        .unwrap_err();
        assert!(err.contains("disk unavailable"));
    }
}
