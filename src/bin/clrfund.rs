//! Operator CLI for a clr.fund round: list rounds, open a session, contribute
//! for the configured participants, and cast their votes.

use clrfund_ops::commands::contribute::{
    format_token_amount, parse_token_amount, run_contributions, ContributeOptions,
    DEFAULT_CONTRIBUTION,
};
use clrfund_ops::commands::vote::{run_votes, VoteOptions};
use clrfund_ops::directory::{list_rounds, resolve_current_round, OffchainRounds, RoundReference};
use clrfund_ops::net::rpc::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_REQUEST_TIMEOUT_MS};
use clrfund_ops::net::{contributor_wallets, snapshot, RpcClient, RpcConfig, RpcRegistry, RpcRound};
use clrfund_ops::cipher::is_devnet_chain;
use clrfund_ops::{Address, DevnetCipher, PubKey, SessionStore};
use rand::rngs::OsRng;
use std::env;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
const DEFAULT_STATE_PATH: &str = "clrfund_session.json";
const PARTIAL_EXIT_CODE: i32 = 2;

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn print_help() {
    println!("Usage: clrfund <rounds|session|contribute|vote|account> ...");
    println!("  rounds [--factory <addr>] [--extra-round <ipfs hash>]... [--ipfs-gateway <url>]");
    println!("  session init [--round <addr>] [--factory <addr>] [--coordinator-pubkey macipk.<hex>]");
    println!("  session show");
    println!("  session drop --round <addr>");
    println!("  contribute [--round <addr>] [--amount <tokens>]");
    println!("  vote [--round <addr>] [--recipients 1,2,...] [--gas-limit <N>] [--devnet-cipher]");
    println!("  account <addr> [--token <addr>] [--user-registry <addr>]");
    println!("Common: --rpc <url> --state <file> --from-block <N>");
    println!("Env: CLRFUND_RPC_URL CLRFUND_STATE CLRFUND_FACTORY CLRFUND_EXTRA_ROUNDS");
    println!("     CLRFUND_IPFS_GATEWAY CLRFUND_RPC_TIMEOUT_MS CLRFUND_POLL_INTERVAL_MS");
    println!("     CONTRIBUTOR_PK_1..N");
}

/// Flags shared by every subcommand, seeded from the environment.
struct Settings {
    rpc_url: String,
    state_path: PathBuf,
    factory: Option<Address>,
    from_block: u64,
    extra_rounds: Vec<String>,
    ipfs_gateway: Option<String>,
    request_timeout: Duration,
    poll_interval: Duration,
}

impl Settings {
    fn from_env() -> Self {
        Self {
            rpc_url: env::var("CLRFUND_RPC_URL").unwrap_or_else(|_| DEFAULT_RPC_URL.to_string()),
            state_path: PathBuf::from(
                env::var("CLRFUND_STATE").unwrap_or_else(|_| DEFAULT_STATE_PATH.to_string()),
            ),
            factory: env::var("CLRFUND_FACTORY")
                .ok()
                .map(|raw| parse_address("CLRFUND_FACTORY", &raw)),
            from_block: 0,
            extra_rounds: env::var("CLRFUND_EXTRA_ROUNDS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            ipfs_gateway: env::var("CLRFUND_IPFS_GATEWAY").ok(),
            request_timeout: Duration::from_millis(env_millis(
                "CLRFUND_RPC_TIMEOUT_MS",
                DEFAULT_REQUEST_TIMEOUT_MS,
            )),
            poll_interval: Duration::from_millis(env_millis(
                "CLRFUND_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )),
        }
    }

    /// Consumes a common flag; returns `false` when `arg` is not one.
    fn take(&mut self, arg: &str, iter: &mut impl Iterator<Item = String>) -> bool {
        match arg {
            "--rpc" => self.rpc_url = expect_value(iter, "--rpc"),
            "--state" => self.state_path = PathBuf::from(expect_value(iter, "--state")),
            "--factory" => {
                self.factory = Some(parse_address("--factory", &expect_value(iter, "--factory")))
            }
            "--from-block" => {
                self.from_block = expect_value(iter, "--from-block")
                    .parse()
                    .unwrap_or_else(|_| fatal("invalid --from-block"))
            }
            "--extra-round" => self.extra_rounds.push(expect_value(iter, "--extra-round")),
            "--ipfs-gateway" => self.ipfs_gateway = Some(expect_value(iter, "--ipfs-gateway")),
            _ => return false,
        }
        true
    }

    fn rpc_config(&self) -> RpcConfig {
        RpcConfig {
            url: self.rpc_url.clone(),
            request_timeout: self.request_timeout,
            poll_interval: self.poll_interval,
        }
    }

    fn offchain(&self) -> OffchainRounds {
        let mut offchain = OffchainRounds::new(self.extra_rounds.clone());
        if let Some(gateway) = &self.ipfs_gateway {
            offchain.gateway = gateway.clone();
        }
        offchain
    }

    fn require_factory(&self) -> Address {
        self.factory
            .unwrap_or_else(|| fatal("--factory or CLRFUND_FACTORY is required"))
    }

    fn load_store(&self) -> SessionStore {
        SessionStore::load(&self.state_path).unwrap_or_else(|err| fatal(&err.to_string()))
    }
}

fn main() {
    let mut args = env::args().skip(1);
    let command = args.next();
    match command.as_deref() {
        Some("rounds") => cmd_rounds(args.collect()),
        Some("session") => {
            let sub = args.next().unwrap_or_else(|| {
                eprintln!("Usage: clrfund session <init|show|drop> ...");
                std::process::exit(1);
            });
            handle_session(&sub, args.collect());
        }
        Some("contribute") => cmd_contribute(args.collect()),
        Some("vote") => cmd_vote(args.collect()),
        Some("account") => cmd_account(args.collect()),
        Some("-h") | Some("--help") => print_help(),
        _ => {
            eprintln!("Usage: clrfund <rounds|session|contribute|vote|account> ...");
            std::process::exit(1);
        }
    }
}

fn handle_session(sub: &str, tail: Vec<String>) {
    match sub {
        "init" => cmd_session_init(tail),
        "show" => cmd_session_show(tail),
        "drop" => cmd_session_drop(tail),
        _ => {
            eprintln!("Unknown session subcommand: {sub}");
            std::process::exit(1);
        }
    }
}

fn cmd_rounds(args: Vec<String>) {
    let mut settings = Settings::from_env();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if !settings.take(&arg, &mut iter) {
            fatal(&format!("unknown argument: {arg}"));
        }
    }
    let factory = settings.require_factory();

    let listing = block_on(async {
        let rpc = connect(&settings).await;
        let registry = RpcRegistry::new(&rpc, factory, settings.from_block);
        list_rounds(&registry, &settings.offchain()).await
    });
    for round in &listing.rounds {
        print_round(round);
    }
    if let Some(err) = &listing.unavailable {
        eprintln!("listing incomplete: {err}");
        std::process::exit(PARTIAL_EXIT_CODE);
    }
}

fn cmd_session_init(args: Vec<String>) {
    let mut settings = Settings::from_env();
    let mut round: Option<Address> = None;
    let mut coordinator: Option<PubKey> = None;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--round" => round = Some(parse_address("--round", &expect_value(&mut iter, "--round"))),
            "--coordinator-pubkey" => {
                let raw = expect_value(&mut iter, "--coordinator-pubkey");
                coordinator = Some(
                    PubKey::unserialize(&raw)
                        .unwrap_or_else(|err| fatal(&format!("invalid --coordinator-pubkey: {err}"))),
                );
            }
            _ => {
                if !settings.take(&arg, &mut iter) {
                    fatal(&format!("unknown argument: {arg}"));
                }
            }
        }
    }

    let reference = match (round, settings.factory) {
        (Some(address), None) => RoundReference {
            index: 0,
            address: Some(address),
            url: None,
        },
        (round, Some(factory)) => block_on(async {
            let rpc = connect(&settings).await;
            let registry = RpcRegistry::new(&rpc, factory, settings.from_block);
            let offchain = settings.offchain();
            match round {
                Some(address) => {
                    let listing = list_rounds(&registry, &offchain).await;
                    match listing.find(&address) {
                        Some(found) => found.clone(),
                        None => fatal(&format!("round {address} is not registered by {factory}")),
                    }
                }
                None => resolve_current_round(&registry, &offchain)
                    .await
                    .unwrap_or_else(|err| fatal(&err.to_string())),
            }
        }),
        (None, None) => fatal("session init needs --round or --factory"),
    };

    let mut store = settings.load_store();
    let address = reference
        .address
        .unwrap_or_else(|| fatal("resolved round has no contract address"));
    store
        .open_round(reference.clone())
        .unwrap_or_else(|err| fatal(&err.to_string()));
    if let Some(key) = coordinator {
        store
            .set_coordinator_key(&address, key)
            .unwrap_or_else(|err| fatal(&err.to_string()));
    }
    store
        .save(&settings.state_path)
        .unwrap_or_else(|err| fatal(&err.to_string()));
    print_round(&reference);
}

fn cmd_session_show(args: Vec<String>) {
    let mut settings = Settings::from_env();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if !settings.take(&arg, &mut iter) {
            fatal(&format!("unknown argument: {arg}"));
        }
    }
    let store = settings.load_store();
    for (address, session) in store.rounds() {
        println!("round #{} {address}", session.round.index);
        if let Some(key) = &session.coordinator_public_key {
            println!("  coordinator: {key}");
        }
        for record in session.participants() {
            println!(
                "  {} state_index={} voice_credits={} pubkey={}",
                record.address(),
                record.state_index(),
                record.voice_credits(),
                record.keypair().public
            );
        }
    }
}

fn cmd_session_drop(args: Vec<String>) {
    let mut settings = Settings::from_env();
    let mut round: Option<Address> = None;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--round" => round = Some(parse_address("--round", &expect_value(&mut iter, "--round"))),
            _ => {
                if !settings.take(&arg, &mut iter) {
                    fatal(&format!("unknown argument: {arg}"));
                }
            }
        }
    }
    let round = round.unwrap_or_else(|| fatal("--round is required"));
    let mut store = settings.load_store();
    let removed = store
        .remove_round(&round)
        .unwrap_or_else(|| fatal(&format!("no session for round {round}")));
    store
        .save(&settings.state_path)
        .unwrap_or_else(|err| fatal(&err.to_string()));
    println!(
        "dropped round {round} with {} participant(s)",
        removed.participant_count()
    );
}

fn cmd_contribute(args: Vec<String>) {
    let mut settings = Settings::from_env();
    let mut round: Option<Address> = None;
    let mut amount = DEFAULT_CONTRIBUTION;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--round" => round = Some(parse_address("--round", &expect_value(&mut iter, "--round"))),
            "--amount" => {
                amount = parse_token_amount(&expect_value(&mut iter, "--amount"))
                    .unwrap_or_else(|err| fatal(&err.to_string()))
            }
            _ => {
                if !settings.take(&arg, &mut iter) {
                    fatal(&format!("unknown argument: {arg}"));
                }
            }
        }
    }

    let wallets =
        contributor_wallets(|name| env::var(name).ok()).unwrap_or_else(|err| fatal(&err.to_string()));
    let mut store = settings.load_store();
    let round = select_round(&store, round);
    let opts = ContributeOptions {
        amount,
        session_path: settings.state_path.clone(),
    };
    println!(
        "contributing {} tokens for {} participant(s) to {round}",
        format_token_amount(amount),
        wallets.len()
    );

    let summary = block_on(async {
        let rpc = connect(&settings).await;
        let contract = RpcRound::new(&rpc, round);
        run_contributions(&contract, &mut store, &wallets, &opts, &mut OsRng).await
    })
    .unwrap_or_else(|err| fatal(&err.to_string()));

    println!(
        "registered {}/{} participant(s)",
        summary.registered_count(),
        wallets.len()
    );
    for failure in &summary.failed {
        eprintln!("  {}: {}", failure.participant, failure.error);
    }
    if !summary.is_complete() {
        std::process::exit(PARTIAL_EXIT_CODE);
    }
}

fn cmd_vote(args: Vec<String>) {
    let mut settings = Settings::from_env();
    let mut round: Option<Address> = None;
    let mut recipients: Option<Vec<u64>> = None;
    let mut gas_limit: Option<u64> = None;
    let mut force_devnet_cipher = false;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--round" => round = Some(parse_address("--round", &expect_value(&mut iter, "--round"))),
            "--recipients" => {
                let raw = expect_value(&mut iter, "--recipients");
                recipients = Some(
                    split_list(&raw)
                        .iter()
                        .map(|item| {
                            item.parse::<u64>()
                                .unwrap_or_else(|_| fatal(&format!("invalid recipient: {item}")))
                        })
                        .collect(),
                );
            }
            "--devnet-cipher" => force_devnet_cipher = true,
            "--gas-limit" => {
                gas_limit = Some(
                    expect_value(&mut iter, "--gas-limit")
                        .parse()
                        .unwrap_or_else(|_| fatal("invalid --gas-limit")),
                )
            }
            _ => {
                if !settings.take(&arg, &mut iter) {
                    fatal(&format!("unknown argument: {arg}"));
                }
            }
        }
    }

    let wallets =
        contributor_wallets(|name| env::var(name).ok()).unwrap_or_else(|err| fatal(&err.to_string()));
    let mut store = settings.load_store();
    let round = select_round(&store, round);
    let mut opts = VoteOptions::new(settings.state_path.clone());
    if let Some(recipients) = recipients {
        opts.recipients = recipients;
    }
    if let Some(gas_limit) = gas_limit {
        opts.gas_limit = gas_limit;
    }

    let summary = block_on(async {
        let rpc = connect(&settings).await;
        if !is_devnet_chain(rpc.chain_id()) {
            if !force_devnet_cipher {
                fatal(&format!(
                    "chain {} is not a local devnet and MACI coordinators cannot decrypt devnet-cipher messages; pass --devnet-cipher to submit anyway",
                    rpc.chain_id()
                ));
            }
            eprintln!(
                "warning: submitting devnet-cipher messages on chain {}",
                rpc.chain_id()
            );
        }
        let contract = RpcRound::new(&rpc, round);
        run_votes(&contract, &mut store, &wallets, &opts, &DevnetCipher, &mut OsRng).await
    })
    .unwrap_or_else(|err| fatal(&err.to_string()));

    for success in &summary.voted {
        println!(
            "  {}: {} message(s) in {}",
            success.participant, success.messages, success.tx_hash
        );
    }
    for failure in &summary.failed {
        eprintln!("  {}: {}", failure.participant, failure.error);
    }
    if !summary.failed.is_empty() {
        std::process::exit(PARTIAL_EXIT_CODE);
    }
}

fn cmd_account(args: Vec<String>) {
    let mut settings = Settings::from_env();
    let mut address: Option<Address> = None;
    let mut token: Option<Address> = None;
    let mut user_registry: Option<Address> = None;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--token" => token = Some(parse_address("--token", &expect_value(&mut iter, "--token"))),
            "--user-registry" => {
                user_registry = Some(parse_address(
                    "--user-registry",
                    &expect_value(&mut iter, "--user-registry"),
                ))
            }
            other if !other.starts_with("--") && address.is_none() => {
                address = Some(parse_address("address", other))
            }
            _ => {
                if !settings.take(&arg, &mut iter) {
                    fatal(&format!("unknown argument: {arg}"));
                }
            }
        }
    }
    let address = address.unwrap_or_else(|| fatal("Usage: clrfund account <addr> [--token <addr>]"));

    let snap = block_on(async {
        let rpc = connect(&settings).await;
        snapshot(&rpc, address, token, user_registry).await
    })
    .unwrap_or_else(|err| fatal(&err.to_string()));
    println!("address: {}", snap.address);
    println!("ether: {}", format_token_amount(snap.ether_balance));
    if let Some(balance) = snap.token_balance {
        println!("token: {}", format_token_amount(balance));
    }
    if let Some(verified) = snap.verified {
        println!("verified: {verified}");
    }
}

fn select_round(store: &SessionStore, requested: Option<Address>) -> Address {
    if let Some(round) = requested {
        return round;
    }
    let mut rounds = store.rounds().map(|(address, _)| *address);
    match (rounds.next(), rounds.next()) {
        (Some(only), None) => only,
        (None, _) => fatal("no open session; run `clrfund session init` first"),
        _ => fatal("several sessions are open; pass --round"),
    }
}

fn print_round(round: &RoundReference) {
    match (&round.address, &round.url) {
        (Some(address), _) => println!("#{} {address}", round.index),
        (None, Some(url)) => println!("#{} {url}", round.index),
        (None, None) => println!("#{}", round.index),
    }
}

async fn connect(settings: &Settings) -> RpcClient {
    RpcClient::connect(&settings.rpc_config())
        .await
        .unwrap_or_else(|err| fatal(&format!("rpc connect failed: {err}")))
}

fn block_on<F: Future>(fut: F) -> F::Output {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|err| fatal(&format!("failed to start runtime: {err}")));
    runtime.block_on(fut)
}

fn expect_value(iter: &mut impl Iterator<Item = String>, flag: &str) -> String {
    iter.next()
        .unwrap_or_else(|| fatal(&format!("{flag} expects a value")))
}

fn parse_address(label: &str, raw: &str) -> Address {
    Address::parse(raw).unwrap_or_else(|err| fatal(&format!("invalid {label}: {err}")))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn env_millis(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| fatal(&format!("invalid {name}: {raw}"))),
        Err(_) => default,
    }
}
