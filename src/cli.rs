//! Command line surface
//!
//! `clap` arguments for the binary plus the interactive command set:
//! `quit`, `reset`, `status`, `param key=value`, `add`, `check`, `help`;
//! anything else is a question.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use crate::assistant::Assistant;
use crate::config::{Config, ModelConfig};
use crate::streaming::ResponseStreamer;
use crate::types::{AppError, AppResult};

#[derive(Parser, Debug)]
#[command(name = "bioflow-assistant")]
#[command(about = "生物信息学科研流程智能助手")]
#[command(version)]
pub struct Args {
    /// Knowledge base JSON file (overrides KNOWLEDGE_DB_PATH)
    #[arg(long)]
    pub knowledge_db: Option<PathBuf>,

    /// Print answers at once instead of streaming them
    #[arg(long)]
    pub no_stream: bool,

    /// Log level for this crate (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Ask a single question and exit; interactive mode when omitted
    pub query: Vec<String>,
}

impl Args {
    pub fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.knowledge_db {
            config.knowledge.db_path = path.clone();
        }
        if self.no_stream {
            config.stream.enabled = false;
        }
        if let Some(level) = &self.log_level {
            config.logging.filter = format!("bioflow_assistant={}", level);
        }
    }

    pub fn one_shot_query(&self) -> Option<String> {
        let query = self.query.join(" ");
        let query = query.trim();
        (!query.is_empty()).then(|| query.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Reset,
    Status,
    Help,
    Check,
    Param { key: String, value: String },
    Add { kind: String, tags: Vec<String>, content: String },
    Query(String),
    Empty,
}

impl Command {
    pub fn parse(line: &str) -> AppResult<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Command::Empty);
        }

        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };

        match head.to_lowercase().as_str() {
            "quit" | "exit" if rest.is_empty() => Ok(Command::Quit),
            "reset" if rest.is_empty() => Ok(Command::Reset),
            "status" if rest.is_empty() => Ok(Command::Status),
            "help" if rest.is_empty() => Ok(Command::Help),
            "check" if rest.is_empty() => Ok(Command::Check),
            "param" => Self::parse_param(rest),
            "add" => Self::parse_add(rest),
            _ => Ok(Command::Query(line.to_string())),
        }
    }

    /// `param key=value` or `param key value`
    fn parse_param(rest: &str) -> AppResult<Self> {
        let (key, value) = rest
            .split_once('=')
            .or_else(|| rest.split_once(char::is_whitespace))
            .map(|(k, v)| (k.trim(), v.trim()))
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .ok_or_else(|| {
                AppError::InvalidRequest(format!(
                    "用法: param <参数>=<值>，可用参数: {}",
                    ModelConfig::KEYS.join(", ")
                ))
            })?;
        Ok(Command::Param {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// `add <type> <tag1,tag2> <content...>`
    fn parse_add(rest: &str) -> AppResult<Self> {
        let usage = || AppError::InvalidRequest("用法: add <类型> <标签1,标签2> <内容>".to_string());

        let (kind, rest) = rest.split_once(char::is_whitespace).ok_or_else(usage)?;
        let (tags, content) = rest.trim().split_once(char::is_whitespace).ok_or_else(usage)?;
        let content = content.trim();
        if content.is_empty() {
            return Err(usage());
        }

        Ok(Command::Add {
            kind: kind.to_string(),
            tags: tags
                .split([',', '，'])
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            content: content.to_string(),
        })
    }
}

pub const HELP_TEXT: &str = "命令:
  quit / exit              退出
  reset                    重置对话与交互计数
  status                   查看当前状态
  param <参数>=<值>        更新模型参数 (temperature, top_p, max_tokens, frequency_penalty, presence_penalty)
  add <类型> <标签,...> <内容>  添加知识条目
  check                    检查 LLM 接口连接
  help                     显示本帮助
其他输入将作为问题提交。";

async fn print_answer(streamer: &ResponseStreamer, answer: &str) {
    print!("助手: ");
    streamer
        .play(answer, |chunk| {
            print!("{}", chunk);
            let _ = io::stdout().flush();
        })
        .await;
    println!("\n");
}

/// Run one question and print the answer
pub async fn run_once(assistant: &mut Assistant, streamer: &ResponseStreamer, query: &str) {
    let answer = assistant.process_query(query).await;
    print_answer(streamer, &answer).await;
}

/// Interactive loop over stdin until `quit` or end of input
pub async fn run_repl(assistant: &mut Assistant, streamer: &ResponseStreamer) -> anyhow::Result<()> {
    println!("=== 生物信息学科研流程智能助手 ===");
    println!("输入 help 查看命令，quit 退出。\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("用户: ");
        io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}\n", e);
                continue;
            }
        };

        match command {
            Command::Empty => continue,
            Command::Quit => break,
            Command::Help => println!("{}\n", HELP_TEXT),
            Command::Reset => {
                assistant.reset();
                println!("对话已重置。\n");
            }
            Command::Status => println!("{}\n", assistant.get_status().await),
            Command::Check => match assistant.check_connectivity().await {
                Ok(models) => println!("✅ LLM 接口连接正常，可用模型: {}\n", models.join(", ")),
                Err(e) => println!("❌ LLM 接口连接失败: {}\n", e),
            },
            Command::Param { key, value } => match assistant.update_model_config(&key, &value) {
                Ok(()) => println!("已更新 {} = {}\n", key, value),
                Err(e) => println!("参数更新失败: {}\n", e),
            },
            Command::Add { kind, tags, content } => match assistant.add_knowledge(&kind, tags, &content).await {
                Ok(record) => println!("已添加知识条目 #{} ({})\n", record.id, record.kind),
                Err(e) => {
                    error!(error = %e, "Failed to add knowledge");
                    println!("添加失败: {}\n", e);
                }
            },
            Command::Query(query) => run_once(assistant, streamer, &query).await,
        }
    }

    info!("Interactive session ended");
    println!("再见！");
    Ok(())
}
