//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `datarepo_core` linkage and run one end-to-end repository pass.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Usage: `datarepo_cli [db-path]`. Without a path an in-memory database is
//! used. Set `DATAREPO_LOG_DIR` to an absolute directory to enable logging.

use datarepo_core::{
    default_log_level, init_logging, open_db, open_db_in_memory, Direction, Member,
    MemberRepository, PageRequest, RepoResult, Session, Sort, Team, TeamRepository, TxMode,
};
use log::{error, info};
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("datarepo_core ping={}", datarepo_core::ping());
    println!("datarepo_core version={}", datarepo_core::core_version());

    if let Ok(dir) = std::env::var("DATAREPO_LOG_DIR") {
        if let Err(err) = init_logging(default_log_level(), &dir) {
            eprintln!("logging disabled: {err}");
        }
    }

    match run(std::env::args().nth(1)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_run module=cli status=error error={err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(path: Option<String>) -> RepoResult<()> {
    let conn = match &path {
        Some(path) => open_db(path)?,
        None => open_db_in_memory()?,
    };
    let session = Session::with_defaults(&conn)?;
    let teams = TeamRepository::new(&session)?;
    let members = MemberRepository::new(&session)?;

    session.transaction(TxMode::Write, |_| {
        let mut team_a = Team::new("teamA");
        let mut team_b = Team::new("teamB");
        teams.save(&mut team_a)?;
        teams.save(&mut team_b)?;
        for (index, age) in [10, 20, 30, 40, 50].into_iter().enumerate() {
            let team = if index % 2 == 0 { &mut team_a } else { &mut team_b };
            let mut member = Member::create(format!("member{}", index + 1), age, Some(team))?;
            members.save(&mut member)?;
        }
        Ok(())
    })?;
    info!("event=cli_seed module=cli status=ok");

    let request = PageRequest::with_sort(0, 3, Sort::by(Direction::Desc, ["age"]))?;
    let page = members.entities().find_all_page(&request)?;
    println!(
        "page={} size={} total_elements={} total_pages={}",
        page.number(),
        page.size(),
        page.total_elements(),
        page.total_pages()
    );
    for member in page.content() {
        let team = member.fetched_team().map_or("-", |team| team.name.as_str());
        println!("member username={} age={} team={team}", member.username(), member.age());
    }

    let updated = session.transaction(TxMode::Write, |_| members.bulk_age_plus(30))?;
    println!("bulk_age_plus updated={updated}");
    Ok(())
}
