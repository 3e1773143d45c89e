use camino::Utf8Path;
use console::Style;

use crate::compiler::Diagnostic;
use crate::state::{RunResult, SurvivedMutant};

pub fn print_error(msg: &str) {
    let style = Style::new().red().bold();
    eprintln!("{} {}", style.apply_to("✗"), msg);
}

pub fn print_success(msg: &str) {
    let style = Style::new().green().bold();
    println!("{} {}", style.apply_to("✓"), msg);
}

/// Compiler errors that made the build unrecoverable, one per line.
pub fn print_diagnostics(diagnostics: &[Diagnostic]) {
    let dim = Style::new().dim();
    for d in diagnostics {
        let code = d.code.as_deref().map(|c| format!("[{}] ", c)).unwrap_or_default();
        eprintln!(
            "  {} {}{}",
            dim.apply_to(format!("{}:{}..{}", d.file, d.span.start, d.span.end)),
            code,
            d.message
        );
    }
}

pub fn print_run_result(result: &RunResult, project: &Utf8Path) {
    let score_pct = result.score * 100.0;
    let testable = result.testable();
    let seconds = result.duration_ms as f64 / 1000.0;

    if result.survived == 0 {
        let style = Style::new().green().bold();
        println!(
            "{} {}: {} mutants, all killed ({:.1}%) in {:.1}s",
            style.apply_to("✓"),
            project,
            testable,
            score_pct,
            seconds,
        );
    } else {
        let style = Style::new().yellow().bold();
        println!(
            "{} {}: {} survived / {} testable ({:.1}% killed) in {:.1}s",
            style.apply_to("!"),
            project,
            result.survived,
            testable,
            score_pct,
            seconds,
        );
    }

    let dim = Style::new().dim();
    if result.timeout > 0 {
        println!("  {} {} mutants timed out", dim.apply_to("·"), result.timeout);
    }
    if result.no_coverage > 0 {
        println!("  {} {} mutants not reached by any test", dim.apply_to("·"), result.no_coverage);
    }
    if result.compile_error > 0 {
        println!("  {} {} mutants did not compile", dim.apply_to("·"), result.compile_error);
    }
    if result.ignored > 0 {
        println!("  {} {} mutants ignored", dim.apply_to("·"), result.ignored);
    }

    if result.survived_mutants.is_empty() {
        return;
    }
    println!();
    for m in &result.survived_mutants {
        let ref_style = Style::new().cyan().bold();
        let loc_style = Style::new().dim();
        let op_style = Style::new().magenta();

        println!(
            "  {} {}:{} {} {} → {}",
            ref_style.apply_to(format!("@{}", m.ref_id)),
            m.file,
            m.line,
            loc_style.apply_to(format!("[{}]", m.operator)),
            op_style.apply_to(&m.original),
            op_style.apply_to(&m.replacement),
        );
    }
}

pub fn print_mutant_detail(m: &SurvivedMutant) {
    let ref_style = Style::new().cyan().bold();
    let dim = Style::new().dim();

    println!(
        "{} {}:{}:{} [{}] {}",
        ref_style.apply_to(format!("@{}", m.ref_id)),
        m.file,
        m.line,
        m.column,
        m.operator,
        dim.apply_to(&m.description),
    );
    println!();

    for line in &m.context_before {
        println!("  {}", dim.apply_to(line));
    }

    for line in m.diff.lines() {
        if line.starts_with('-') {
            println!("  {}", Style::new().red().apply_to(line));
        } else if line.starts_with('+') {
            println!("  {}", Style::new().green().apply_to(line));
        }
    }

    for line in &m.context_after {
        println!("  {}", dim.apply_to(line));
    }
}

pub fn print_status(result: &RunResult) {
    println!(
        "Last run: {} mutants, {} killed, {} survived, {} timed out ({:.1}% score)",
        result.testable(),
        result.killed,
        result.survived,
        result.timeout,
        result.score * 100.0,
    );

    if result.survived > 0 {
        println!();
        for m in &result.survived_mutants {
            let ref_style = Style::new().cyan().bold();
            println!(
                "  {} {}:{} {} → {}",
                ref_style.apply_to(format!("@{}", m.ref_id)),
                m.file,
                m.line,
                m.original,
                m.replacement,
            );
        }
        println!();
        println!("Use `mutator show @m1` for details on a specific mutant.");
    }
}
