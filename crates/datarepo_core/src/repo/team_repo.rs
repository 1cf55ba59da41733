//! Team repository.

use crate::exec::args::Args;
use crate::mapping::TEAM;
use crate::model::team::Team;
use crate::page::{Page, PageRequest};
use crate::query::method::{MethodDecl, ReturnKind};
use crate::query::registry::QueryRegistry;
use crate::repo::entity_repo::EntityRepository;
use crate::repo::error::RepoResult;
use crate::session::Session;
use once_cell::sync::OnceCell;

pub static TEAM_METHODS: &[MethodDecl] = &[MethodDecl::derived("findByName", ReturnKind::Many)];

static TEAM_REGISTRY: OnceCell<QueryRegistry> = OnceCell::new();

pub fn team_registry() -> RepoResult<&'static QueryRegistry> {
    Ok(TEAM_REGISTRY.get_or_try_init(|| QueryRegistry::build(&TEAM, TEAM_METHODS))?)
}

pub struct TeamRepository<'s, 'conn> {
    base: EntityRepository<'s, 'conn, Team>,
}

impl<'s, 'conn> TeamRepository<'s, 'conn> {
    pub fn new(session: &'s Session<'conn>) -> RepoResult<Self> {
        Ok(Self {
            base: EntityRepository::new(session, team_registry()?)?,
        })
    }

    pub fn entities(&self) -> &EntityRepository<'s, 'conn, Team> {
        &self.base
    }

    pub fn save(&self, team: &mut Team) -> RepoResult<()> {
        self.base.save(team)
    }

    pub fn save_all(&self, teams: &mut [Team]) -> RepoResult<()> {
        self.base.save_all(teams)
    }

    pub fn find_by_id(&self, id: i64) -> RepoResult<Option<Team>> {
        self.base.find_by_id(id)
    }

    pub fn find_all(&self) -> RepoResult<Vec<Team>> {
        self.base.find_all()
    }

    pub fn find_all_page(&self, request: &PageRequest) -> RepoResult<Page<Team>> {
        self.base.find_all_page(request)
    }

    pub fn count(&self) -> RepoResult<u64> {
        self.base.count()
    }

    /// Fails with a constraint violation while members still reference the
    /// team; the failure surfaces when the removal is flushed.
    pub fn delete(&self, team: &Team) -> RepoResult<()> {
        self.base.delete(team)
    }

    pub fn delete_by_id(&self, id: i64) -> RepoResult<()> {
        self.base.delete_by_id(id)
    }

    pub fn find_by_name(&self, name: &str) -> RepoResult<Vec<Team>> {
        self.base
            .query_list("findByName", &Args::positional([name.into()]))
    }
}
