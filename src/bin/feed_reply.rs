//! feed-reply: streams a reply from stdin to the speech API in small chunks.
//!
//! Stands in for a language model during manual testing: the text arrives
//! a few characters at a time, the way tokens would.

use std::io::Read;
use std::time::{Duration, Instant};

use clap::Parser;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "feed-reply", about = "Stream stdin to realtime-tts-rs as a reply")]
struct Args {
    /// Base URL of the speech API
    #[arg(long, default_value = "http://127.0.0.1:8768")]
    api: String,

    /// Characters per chunk
    #[arg(long, default_value_t = 4)]
    chunk_chars: usize,

    /// Delay between chunks in milliseconds
    #[arg(long, default_value_t = 50)]
    delay_ms: u64,

    /// Give up waiting for playback after this many seconds
    #[arg(long, default_value_t = 120)]
    wait_secs: u64,
}

#[derive(Serialize)]
struct StartRequest<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct TextRequest<'a> {
    session: u64,
    delta: &'a str,
}

#[derive(Serialize)]
struct FinishRequest {
    session: u64,
}

#[derive(Deserialize)]
struct SimpleResponse {
    status: String,
    session: Option<u64>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    idle: bool,
    output_available: bool,
}

/// Split into chunks of at most `size` characters.
fn chunks(text: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut out = Vec::new();
    let mut start = 0;
    for (count, (idx, _)) in text.char_indices().enumerate() {
        if count > 0 && count % size == 0 {
            out.push(&text[start..idx]);
            start = idx;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

async fn post<T: Serialize>(client: &Client, url: &str, body: &T) -> Result<SimpleResponse, reqwest::Error> {
    client.post(url).json(body).send().await?.json().await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("info"))
        .init();

    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    if input.trim().is_empty() {
        warn!("Nothing to say");
        return Ok(());
    }

    let client = Client::builder()
        .connect_timeout(Duration::from_millis(500))
        .timeout(Duration::from_secs(5))
        .build()?;
    let api = args.api.trim_end_matches('/');
    let parts = chunks(&input, args.chunk_chars);
    let delay = Duration::from_millis(args.delay_ms);
    let t0 = Instant::now();

    let (first, rest) = parts.split_first().map_or(("", &[][..]), |(f, r)| (*f, r));
    let started = post(&client, &format!("{api}/session/start"), &StartRequest { text: first }).await?;
    let Some(session) = started.session else {
        let reason = started.error.unwrap_or(started.status);
        warn!("Session not started: {reason}");
        return Ok(());
    };
    info!("Session {session} started, streaming {} chunks", parts.len());

    for delta in rest.iter().copied() {
        tokio::time::sleep(delay).await;
        let resp = post(&client, &format!("{api}/session/text"), &TextRequest { session, delta }).await?;
        if resp.status == "error" {
            warn!("Chunk rejected: {}", resp.error.unwrap_or_default());
        }
    }
    post(&client, &format!("{api}/session/finish"), &FinishRequest { session }).await?;
    info!("Reply sent in {:.1}s, waiting for playback", t0.elapsed().as_secs_f64());

    let deadline = Instant::now() + Duration::from_secs(args.wait_secs);
    loop {
        let status: StatusResponse = client.get(format!("{api}/status")).send().await?.json().await?;
        if !status.output_available {
            warn!("Audio output unavailable on the server");
            break;
        }
        if status.idle {
            break;
        }
        if Instant::now() >= deadline {
            warn!("Gave up waiting for playback");
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    info!("Done in {:.1}s", t0.elapsed().as_secs_f64());

    Ok(())
}
