//! cz: CLI driver for the caissa search core.
//!
//! Subcommands:
//! - search   run a search over a position against the stub evaluator
//! - version  print crate versions

use std::env;
use std::process;

use cz_core::{move_from_uci, move_to_uci, Config, Position};
use cz_eval::UniformEvaluator;
use cz_logging::{now_ms, BestMoveEventV1, EventLog, SearchStepEventV1};
use cz_mcts::{Search, SearchLimit, SearchParams};

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("search") => cmd_search(&args[1..]),
        Some("version") => {
            println!("cz {}", env!("CARGO_PKG_VERSION"));
            println!("cz-mcts {}", cz_mcts::VERSION);
            println!("cz-core {}", cz_core::VERSION);
        }
        Some("--help") | Some("-h") | None => print_usage(),
        Some(other) => {
            eprintln!("Unknown subcommand: {other}");
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        r#"cz - caissa search core driver

USAGE:
    cz search [OPTIONS]
    cz version

SEARCH OPTIONS:
    --fen FEN            Root position (default: startpos)
    --moves "m1 m2 .."   UCI moves applied after the root position
    --nodes N            Node budget per move (default: 10000)
    --movetime SECS      Time budget per move instead of --nodes
    --searchmoves "m1 m2 .."
                         Restrict the root move set
    --config PATH        YAML config file
    --events PATH        Append NDJSON search events to PATH
    --verbose            Print the root distribution after the search
"#
    );
}

fn cmd_search(args: &[String]) {
    let mut fen: Option<String> = None;
    let mut moves: Vec<String> = Vec::new();
    let mut nodes: f64 = 10_000.0;
    let mut movetime: Option<f64> = None;
    let mut searchmoves: Vec<String> = Vec::new();
    let mut config_path: Option<String> = None;
    let mut events_path: Option<String> = None;
    let mut verbose = false;

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return;
            }
            "--fen" => {
                fen = Some(require_value(args, i, "--fen"));
                i += 2;
            }
            "--moves" => {
                moves = require_value(args, i, "--moves")
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                i += 2;
            }
            "--nodes" => {
                nodes = parse_value(args, i, "--nodes");
                i += 2;
            }
            "--movetime" => {
                movetime = Some(parse_value(args, i, "--movetime"));
                i += 2;
            }
            "--searchmoves" => {
                searchmoves = require_value(args, i, "--searchmoves")
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                i += 2;
            }
            "--config" => {
                config_path = Some(require_value(args, i, "--config"));
                i += 2;
            }
            "--events" => {
                events_path = Some(require_value(args, i, "--events"));
                i += 2;
            }
            "--verbose" => {
                verbose = true;
                i += 1;
            }
            other => {
                eprintln!("Unknown option for `cz search`: {other}");
                process::exit(1);
            }
        }
    }

    let mut pos = match fen {
        Some(f) => Position::from_fen(&f).unwrap_or_else(|e| {
            eprintln!("{e}");
            process::exit(1);
        }),
        None => Position::startpos(),
    };
    for m in &moves {
        let mv = move_from_uci(pos.board(), m).unwrap_or_else(|e| {
            eprintln!("{e}");
            process::exit(1);
        });
        if let Err(e) = pos.play(mv) {
            eprintln!("{e}");
            process::exit(1);
        }
    }

    let config = match config_path {
        Some(p) => Config::from_path(&p).unwrap_or_else(|e| {
            eprintln!("Failed to load config: {e}");
            process::exit(1);
        }),
        None => Config::default(),
    };
    let params = SearchParams::from_config(&config.search);

    let mut limit = match movetime {
        Some(secs) => SearchLimit::seconds_per_move(secs),
        None => SearchLimit::nodes_per_move(nodes),
    }
    .unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });
    if !searchmoves.is_empty() {
        let mut restricted = Vec::with_capacity(searchmoves.len());
        for m in &searchmoves {
            match move_from_uci(pos.board(), m) {
                Ok(mv) => restricted.push(mv),
                Err(e) => {
                    eprintln!("{e}");
                    process::exit(1);
                }
            }
        }
        limit = limit.with_search_moves(restricted);
    }
    if config.store.expandable {
        limit = limit.expandable(true);
    }

    let mut events = events_path.as_ref().map(|p| {
        EventLog::with_flush_threshold(p, config.logging.flush_bytes).unwrap_or_else(|e| {
            eprintln!("Failed to open event log: {e}");
            process::exit(1);
        })
    });
    let run_id = format!("cz-{}", now_ms());
    let limit_text = limit.to_string();

    let evaluator = UniformEvaluator::default();
    let mut search = Search::new(pos.clone(), limit, params).unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });

    loop {
        let progress = match search.step(&evaluator) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("search aborted: {e}");
                break;
            }
        };
        if let Some(w) = events.as_mut() {
            let stats = progress.stats;
            let ev = SearchStepEventV1 {
                event: "search_step_v1",
                ts_ms: now_ms(),
                run_id: run_id.clone(),
                batch: progress.batches,
                tree_nodes: progress.tree_nodes as u64,
                root_n: progress.root_n,
                root_q: progress.root_q,
                elapsed_ms: progress.elapsed.as_millis() as u64,
                evaluator_calls: stats.evaluator_calls,
                evaluated_positions: stats.evaluated_positions,
                transposition_links: stats.transposition_links,
                transposition_draws: stats.transposition_draws,
                deferred_pairings: stats.deferred_pairings,
                materializations: stats.materializations,
                max_batch_fill: stats.max_batch_fill as u64,
            };
            if let Err(e) = w.write(&ev) {
                eprintln!("event log write failed: {e}");
            }
        }
        if progress.done {
            break;
        }
    }

    if verbose {
        println!("  move        N        Q        P");
        for (mv, n, q, p) in search.root_distribution().iter().take(10) {
            println!(
                "  {:<6} {:>8} {:>8.4} {:>8.4}",
                move_to_uci(pos.board(), *mv),
                n,
                q,
                p
            );
        }
    }

    match search.best() {
        Some(best) => {
            if let Some(w) = events.as_mut() {
                let ev = BestMoveEventV1 {
                    event: "best_move_v1",
                    ts_ms: now_ms(),
                    run_id: run_id.clone(),
                    limit: limit_text,
                    best_move: move_to_uci(pos.board(), best.best_move),
                    n: best.n,
                    q: best.q,
                    best_n: best.best_n,
                    best_q: best.best_q,
                    top_moves_n_ratio: best.top_moves_n_ratio,
                    mlh_bonus_applied: best.mlh_bonus_applied,
                };
                if let Err(e) = w.write(&ev) {
                    eprintln!("event log write failed: {e}");
                }
                let _ = w.flush();
            }
            println!("bestmove {}", move_to_uci(pos.board(), best.best_move));
        }
        None => println!("bestmove 0000"),
    }
}

fn require_value(args: &[String], i: usize, flag: &str) -> String {
    match args.get(i + 1) {
        Some(v) => v.clone(),
        None => {
            eprintln!("Missing value for {flag}");
            process::exit(1);
        }
    }
}

fn parse_value(args: &[String], i: usize, flag: &str) -> f64 {
    require_value(args, i, flag).parse().unwrap_or_else(|_| {
        eprintln!("Invalid value for {flag}: {}", args[i + 1]);
        process::exit(1);
    })
}
