//! 標準出力への途中経過と最終結果の表示

use chrono::Local;

use rchess_arena::GameRecord;
use rchess_arena::scheduler::{TournamentReport, TournamentState};
use rchess_arena::sprt::SprtStatus;

pub fn on_game_finished(state: &TournamentState, record: &GameRecord, interval: usize) {
    println!(
        "Finished game {} ({} vs {}): {} {{{}}}",
        record.game_id,
        record.white,
        record.black,
        record.result.outcome.pgn_token(),
        record.result.description()
    );
    if interval > 0 && state.completed % interval == 0 {
        print_progress(state);
    }
}

fn print_progress(state: &TournamentState) {
    let elapsed = state.started.elapsed().as_secs_f64();
    let gps = if elapsed > 0.0 {
        state.completed as f64 / elapsed
    } else {
        0.0
    };
    match state.expected_games {
        Some(total) if total > 0 => println!(
            "\n--- Progress: {}/{} ({:.1}%) | {:.2} games/sec | running: {} ---",
            state.completed,
            total,
            state.completed as f64 / total as f64 * 100.0,
            gps,
            state.in_progress.len()
        ),
        _ => println!(
            "\n--- Progress: {} games | {:.2} games/sec | running: {} ---",
            state.completed,
            gps,
            state.in_progress.len()
        ),
    }
    print!("{}", state.standings.pair_table());
    if let Some(sprt) = &state.sprt {
        println!("  {}", sprt_line(sprt));
    }
}

fn sprt_line(sprt: &SprtStatus) -> String {
    format!(
        "SPRT: llr {:.2} ({:.1}%), lbound {:.2}, ubound {:.2} - {}",
        sprt.llr,
        progress_to_bound(sprt) * 100.0,
        sprt.lower,
        sprt.upper,
        sprt.decision.label()
    )
}

/// 近い方の境界に対する LLR の到達度
fn progress_to_bound(sprt: &SprtStatus) -> f64 {
    if sprt.llr >= 0.0 {
        sprt.llr / sprt.upper
    } else {
        sprt.llr / sprt.lower
    }
}

pub fn print_final(report: &TournamentReport) {
    println!();
    println!("// ---------------------------------------------------------------------------");
    println!(
        "// {} ({}) finished at {}",
        report.name,
        report.format.label(),
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    println!("// ---------------------------------------------------------------------------");
    println!(
        "games: {} | elapsed: {:.1}s{}",
        report.games,
        report.elapsed.as_secs_f64(),
        if report.aborted { " | aborted" } else { "" }
    );
    println!();
    print!("{}", report.standings.ranking_table());
    println!();
    print!("{}", report.standings.pair_table());

    if let Some(sprt) = &report.sprt {
        println!();
        println!("{}", sprt_line(sprt));
    }
    if let Some(champion) = &report.champion {
        println!();
        println!("champion: {champion}");
    }
    if !report.errors.is_empty() {
        println!();
        println!("errors ({}):", report.errors.len());
        for e in &report.errors {
            println!(
                "  pairing {} (round {}) {} vs {}: {}",
                e.pairing, e.round, e.white, e.black, e.message
            );
        }
    }
}
