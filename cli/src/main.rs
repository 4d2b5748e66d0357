//! Mosaic CLI - Validator tooling

mod commands;
mod wallet;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::ApiClient;
use mosaic_core::{Address, Hash};
use mosaic_crypto::hashing::sortition_distance;
use mosaic_crypto::signing::{reveal_payload, MemberAction};
use std::path::PathBuf;
use wallet::KeyManager;

#[derive(Parser)]
#[command(name = "mosaic")]
#[command(about = "Mosaic - Metachain Validator CLI")]
#[command(version)]
struct Cli {
    /// Node URL
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    node: String,

    /// Keys directory
    #[arg(short, long, default_value = "./keys")]
    keys_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Key operations
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Node status
    Status,

    /// Show a validator as the node sees it
    Validator {
        /// Validator address
        address: String,
    },

    /// Sign and submit a vote for a metablock proposal
    Vote {
        /// Key name
        #[arg(short, long)]
        key: String,

        /// Proposal hash
        proposal: String,
    },

    /// Vote count of a proposal
    Proposal {
        /// Proposal hash
        proposal: String,
    },

    /// Committee operations
    Committee {
        /// Proposal the committee decides on
        #[arg(short, long)]
        proposal: String,

        #[command(subcommand)]
        action: CommitteeAction,
    },
}

#[derive(Subcommand)]
enum KeyAction {
    /// Create a new random key
    Create {
        /// Key name
        name: String,
    },

    /// Derive a validator key from an operator phrase
    Derive {
        /// Key name
        name: String,

        /// Operator phrase
        #[arg(long)]
        phrase: String,

        /// Validator index
        #[arg(long, default_value = "0")]
        index: u32,
    },

    /// List all keys
    List,

    /// Show key info
    Info {
        /// Key name
        name: String,
    },

    /// Import key from secret key
    Import {
        /// Key name
        name: String,

        /// Secret key (hex)
        secret: String,
    },

    /// Export key secret
    Export {
        /// Key name
        name: String,
    },
}

#[derive(Subcommand)]
enum CommitteeAction {
    /// Show the committee
    Show,

    /// Sortition distance of an address, computed locally
    Distance {
        /// Address to rank
        address: String,

        /// Dislocation of the committee
        #[arg(long)]
        dislocation: String,
    },

    /// Member a validator must be seated in front of
    Hint {
        /// Validator address
        validator: String,
    },

    /// Start the formation cooldown
    Cooldown {
        #[arg(short, long)]
        key: String,
    },

    /// Open the commit phase
    Activate {
        #[arg(short, long)]
        key: String,
    },

    /// Seal and submit a position
    Commit {
        #[arg(short, long)]
        key: String,

        /// Position hash
        position: String,
    },

    /// Reveal a previously committed position
    Reveal {
        #[arg(short, long)]
        key: String,

        /// Position hash
        position: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let keys = KeyManager::new(cli.keys_dir);
    let api_client = ApiClient::new(&cli.node)?;

    if let Err(e) = run(cli.command, &keys, &api_client).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(command: Commands, keys: &KeyManager, api_client: &ApiClient) -> anyhow::Result<()> {
    match command {
        Commands::Key { action } => handle_key_command(action, keys),
        Commands::Status => show_status(api_client).await,
        Commands::Validator { address } => show_validator(api_client, &address).await,
        Commands::Vote { key, proposal } => {
            let key = keys.get(&key)?;
            let proposal = parse_hash(&proposal)?;
            let receipt = api_client.vote(&proposal, &key.sign_vote(&proposal)).await?;
            println!("{} Vote registered", "✓".green());
            println!("Proposal: {}", proposal.to_hex());
            println!("Count:    {}", receipt.count);
            if receipt.precommitted {
                println!("{}", "Proposal precommitted".green().bold());
            }
            Ok(())
        }
        Commands::Proposal { proposal } => {
            let count = api_client.vote_count(&parse_hash(&proposal)?).await?;
            println!("Height:  {}", count.height);
            println!("Dynasty: {}", count.dynasty);
            println!("Votes:   {}", count.count);
            Ok(())
        }
        Commands::Committee { proposal, action } => {
            let proposal = parse_hash(&proposal)?;
            handle_committee_command(action, &proposal, keys, api_client).await
        }
    }
}

fn parse_hash(s: &str) -> anyhow::Result<Hash> {
    Hash::from_hex(s).map_err(|_| anyhow::anyhow!("Invalid hash: {}", s))
}

fn parse_address(s: &str) -> anyhow::Result<Address> {
    Address::from_hex(s).map_err(|_| anyhow::anyhow!("Invalid address: {}", s))
}

fn handle_key_command(action: KeyAction, manager: &KeyManager) -> anyhow::Result<()> {
    match action {
        KeyAction::Create { name } => {
            let key = manager.create(&name)?;
            println!("{} Key '{}' created", "✓".green(), name);
            println!("Address: {}", key.address().to_hex());
        }

        KeyAction::Derive {
            name,
            phrase,
            index,
        } => {
            let key = manager.derive(&name, &phrase, index)?;
            println!("{} Key '{}' derived at index {}", "✓".green(), name, index);
            println!("Address: {}", key.address().to_hex());
        }

        KeyAction::List => {
            let keys = manager.list()?;

            if keys.is_empty() {
                println!("No keys found.");
            } else {
                println!("{:<20} Address", "Name");
                println!("{:-<20} {:-<64}", "", "");
                for k in keys {
                    println!("{:<20} {}", k.name, k.address);
                }
            }
        }

        KeyAction::Info { name } => {
            let key = manager.get(&name)?;
            println!("Key:        {}", key.name());
            println!("Address:    {}", key.address().to_hex());
            println!("Public Key: {}", key.keypair().public_key().to_hex());
            if let Some(index) = key.index() {
                println!("Index:      {}", index);
            }
        }

        KeyAction::Import { name, secret } => {
            let key = manager.import(&name, &secret)?;
            println!("{} Key '{}' imported", "✓".green(), name);
            println!("Address: {}", key.address().to_hex());
        }

        KeyAction::Export { name } => {
            let key = manager.get(&name)?;
            println!("{}", "Keep this secret key safe!".yellow());
            println!("Secret Key: {}", hex::encode(key.keypair().secret_bytes()));
        }
    }

    Ok(())
}

async fn show_status(client: &ApiClient) -> anyhow::Result<()> {
    let status = client.status().await?;
    println!("{}", "Mosaic Node Status".bold());
    println!("==================");
    println!("Name:          {}", status.name);
    println!("Orchestrator:  {}", status.orchestrator);
    println!("Block Height:  {}", status.block_height);
    println!("Core:          {}", status.core.core_id);
    println!("Status:        {}", status.core.status);
    println!(
        "Kernel:        {} at height {}",
        status.core.open_kernel_hash, status.core.open_kernel_height
    );
    println!("Validators:    {}", status.core.validator_count);
    println!("Quorum:        {}", status.core.quorum);
    if let Some(precommit) = status.core.precommit {
        println!("Precommit:     {}", precommit);
    }
    println!("Committees:    {}", status.committees);
    Ok(())
}

async fn show_validator(client: &ApiClient, address: &str) -> anyhow::Result<()> {
    let info = client.validator(&parse_address(address)?).await?;
    println!("Address:    {}", info.record.address);
    println!("Begin:      {}", info.record.begin_height);
    if info.record.end_height != u64::MAX {
        println!("End:        {}", info.record.end_height);
    }
    let active = if info.is_validator {
        "Yes".green()
    } else {
        "No".red()
    };
    println!("Active:     {}", active);
    println!("Reputation: {}", info.reputation);
    if let Some(vote) = info.vote {
        println!("Vote:       {}", vote);
    }
    Ok(())
}

async fn handle_committee_command(
    action: CommitteeAction,
    proposal: &Hash,
    keys: &KeyManager,
    client: &ApiClient,
) -> anyhow::Result<()> {
    match action {
        CommitteeAction::Show => {
            let committee = client.committee(proposal).await?;
            println!("Proposal: {}", committee.proposal);
            println!("Status:   {}", committee.status);
            println!("Quorum:   {}", committee.quorum);
            println!("Members:");
            for member in &committee.members {
                println!("  {}", member);
            }
            println!("Activation:     {}", committee.activation_block_height);
            println!("Commit timeout: {}", committee.commit_timeout_block_height);
            println!("Reveal timeout: {}", committee.reveal_timeout_block_height);
            println!(
                "Commits: {}  Reveals: {}",
                committee.sealed_commits, committee.revealed_positions
            );
            if let Some(decision) = committee.decision {
                println!("{} {}", "Decision:".green().bold(), decision);
            }
        }

        CommitteeAction::Distance {
            address,
            dislocation,
        } => {
            let distance = sortition_distance(
                &parse_address(&address)?,
                &parse_hash(&dislocation)?,
                proposal,
            );
            println!("{}", distance.to_hex());
        }

        CommitteeAction::Hint { validator } => {
            match client.hint(proposal, &parse_address(&validator)?).await? {
                Some(member) => println!("Enter in front of {}", member),
                None => println!("Enter at the far end"),
            }
        }

        CommitteeAction::Cooldown { key } => {
            let key = keys.get(&key)?;
            let signature = key.sign_member_action(proposal, MemberAction::Cooldown, &[]);
            let activation = client.cooldown(proposal, &signature).await?;
            println!("{} Cooldown started", "✓".green());
            println!("Activation at block {}", activation);
        }

        CommitteeAction::Activate { key } => {
            let key = keys.get(&key)?;
            let signature = key.sign_member_action(proposal, MemberAction::Activate, &[]);
            let timeout = client.activate(proposal, &signature).await?;
            println!("{} Commit phase open until block {}", "✓".green(), timeout);
        }

        CommitteeAction::Commit { key, position } => {
            let key = keys.get(&key)?;
            let position = parse_hash(&position)?;
            let salt = key.commit_salt(proposal, &position)?;
            let sealed = key.seal(&position, &salt);
            let signature =
                key.sign_member_action(proposal, MemberAction::Commit, sealed.as_bytes());
            let committee = client.commit(proposal, &sealed, &signature).await?;
            println!("{} Sealed commit {}", "✓".green(), sealed.to_hex());
            println!(
                "{}/{} members committed",
                committee.sealed_commits,
                committee.members.len()
            );
        }

        CommitteeAction::Reveal { key, position } => {
            let key = keys.get(&key)?;
            let position = parse_hash(&position)?;
            let salt = key.commit_salt(proposal, &position)?;
            let payload = reveal_payload(&position, &salt);
            let signature = key.sign_member_action(proposal, MemberAction::Reveal, &payload);
            let count = client.reveal(proposal, &position, &salt, &signature).await?;
            println!("{} Position revealed ({} votes)", "✓".green(), count);
        }
    }

    Ok(())
}
