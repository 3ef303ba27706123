//! Master-server test client
//!
//! One-shot requests against a running master: list the registered
//! servers, register the local address, fetch server metadata, or walk
//! through the signed-demo flow. Useful for poking at a deployment by
//! hand.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use gsmaster_core::protocol::{
    build_packet, decode_string_list, split_packet, DEFAULT_GAME_PORT, DEMO_HASH_LEN,
    MASTER_PACKET_ADD, MASTER_PACKET_ADD_RESPONSE, MASTER_PACKET_GET_METADATA,
    MASTER_PACKET_GET_METADATA_RESPONSE, MASTER_PACKET_QUERY, MASTER_PACKET_QUERY_RESPONSE,
    MASTER_PACKET_SIGN_END, MASTER_PACKET_SIGN_END_RESPONSE, MASTER_PACKET_SIGN_START,
    MASTER_PACKET_SIGN_START_RESPONSE,
};
use gsmaster_core::NONCE_SIZE;

/// Master-server test client
#[derive(Parser)]
#[command(name = "gsmaster-query")]
#[command(author, version, about)]
struct Cli {
    /// Master address, host[:port]
    master: String,

    /// Response timeout in seconds
    #[arg(long, default_value = "10")]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered servers
    Query,
    /// Register this address as a game server
    Add,
    /// Fetch metadata for registered servers
    GetMetadata,
    /// Request a signed demo start message
    SignStart,
    /// Request a signed demo end message; reads the start message from stdin
    SignEnd {
        /// SHA-1 of the demo, hex encoded
        hash: String,
    },
}

struct Client {
    socket: UdpSocket,
    master: SocketAddr,
    timeout: Duration,
}

impl Client {
    async fn connect(master: &str, timeout: Duration) -> Result<Client> {
        let target = if master.contains(':') {
            master.to_string()
        } else {
            format!("{}:{}", master, DEFAULT_GAME_PORT)
        };
        let master = tokio::net::lookup_host(&target)
            .await
            .with_context(|| format!("resolving '{}'", target))?
            .find(|a| a.is_ipv4())
            .with_context(|| format!("no IPv4 address for '{}'", target))?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Client {
            socket,
            master,
            timeout,
        })
    }

    /// Send one request and wait for a response of the expected type from
    /// the master. Packets from other addresses are reported and skipped;
    /// the master may probe a registering address from its verification
    /// socket.
    async fn request(&self, packet_type: u16, payload: &[u8], expected: u16) -> Result<Vec<u8>> {
        let packet = build_packet(packet_type, payload);
        self.socket.send_to(&packet, self.master).await?;

        let mut buf = [0u8; 2048];
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .context("timed out waiting for response")?;
            let (len, from) = timeout(remaining, self.socket.recv_from(&mut buf))
                .await
                .context("timed out waiting for response")??;

            if from != self.master {
                println!("(ignoring packet from {}, expected {})", from, self.master);
                continue;
            }
            let Some((received_type, payload)) = split_packet(&buf[..len]) else {
                bail!("short packet from master");
            };
            if received_type != expected {
                bail!("wrong packet type received: {} != {}", received_type, expected);
            }
            return Ok(payload.to_vec());
        }
    }
}

async fn query(client: &Client) -> Result<()> {
    let payload = client
        .request(MASTER_PACKET_QUERY, &[], MASTER_PACKET_QUERY_RESPONSE)
        .await?;
    let servers = decode_string_list(&payload).context("malformed server list")?;

    println!("{} servers", servers.len());
    for server in servers {
        println!("\t{}", server);
    }
    Ok(())
}

async fn add(client: &Client) -> Result<()> {
    println!("Sending add request to master at {}", client.master);
    let payload = client
        .request(MASTER_PACKET_ADD, &[], MASTER_PACKET_ADD_RESPONSE)
        .await?;
    if payload != 1u16.to_be_bytes() {
        bail!("address not successfully added to master");
    }
    println!("Address added to master.");
    Ok(())
}

async fn get_metadata(client: &Client) -> Result<()> {
    let payload = client
        .request(
            MASTER_PACKET_GET_METADATA,
            &[],
            MASTER_PACKET_GET_METADATA_RESPONSE,
        )
        .await?;
    let servers = decode_string_list(&payload).context("malformed metadata list")?;

    println!("{} servers", servers.len());
    for entry in servers {
        let metadata: serde_json::Value =
            serde_json::from_str(&entry).context("malformed metadata entry")?;
        println!(
            "\tServer: {}:{}",
            metadata["address"].as_str().unwrap_or("?"),
            metadata["port"]
        );
        println!("\t\tAge: {} seconds", metadata["age"]);
        println!("\t\tName: {}", metadata["name"].as_str().unwrap_or("?"));
        println!("\t\tVersion: {}", metadata["version"].as_str().unwrap_or("?"));
        println!("\t\tMax. players: {}", metadata["max_players"]);
    }
    Ok(())
}

async fn sign_start(client: &Client) -> Result<()> {
    let payload = client
        .request(MASTER_PACKET_SIGN_START, &[], MASTER_PACKET_SIGN_START_RESPONSE)
        .await?;
    if payload.len() < NONCE_SIZE {
        bail!("short sign start response");
    }
    println!("Nonce: {}", hex::encode(&payload[..NONCE_SIZE]));
    println!("{}", String::from_utf8_lossy(&payload[NONCE_SIZE..]));
    Ok(())
}

async fn sign_end(client: &Client, hash_hex: &str) -> Result<()> {
    let hash = hex::decode(hash_hex).context("hash must be hex encoded")?;
    if hash.len() != DEMO_HASH_LEN {
        bail!("hash must be {} bytes", DEMO_HASH_LEN);
    }

    println!("Paste the start message, then type ^D");
    let mut start_message = Vec::new();
    tokio::io::stdin().read_to_end(&mut start_message).await?;

    let mut payload = hash;
    payload.extend_from_slice(&start_message);
    let response = client
        .request(MASTER_PACKET_SIGN_END, &payload, MASTER_PACKET_SIGN_END_RESPONSE)
        .await?;
    println!("{}", String::from_utf8_lossy(&response));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::connect(&cli.master, Duration::from_secs(cli.timeout)).await?;

    match &cli.command {
        Command::Query => query(&client).await,
        Command::Add => add(&client).await,
        Command::GetMetadata => get_metadata(&client).await,
        Command::SignStart => sign_start(&client).await,
        Command::SignEnd { hash } => sign_end(&client, hash).await,
    }
}
