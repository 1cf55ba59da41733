//! Member repository: the declared query methods for members.
//!
//! # Responsibility
//! - Declare every member query method in one static table.
//! - Expose typed wrappers so callers never spell method names.
//!
//! # Invariants
//! - The method table is parsed once per process; a bad declaration fails
//!   the first repository construction and every later one.

use crate::exec::args::{ArgValue, Args};
use crate::mapping::{Entity, MEMBER};
use crate::model::dto::MemberDto;
use crate::model::member::Member;
use crate::model::team::Team;
use crate::page::{Page, PageRequest, Slice, Sort};
use crate::query::method::{LockMode, MethodDecl, ReturnKind};
use crate::query::registry::QueryRegistry;
use crate::query::sql::RenderedSql;
use crate::repo::entity_repo::EntityRepository;
use crate::repo::error::RepoResult;
use crate::repo::team_repo::TeamRepository;
use crate::session::{ReadKind, Session, TxMode};
use once_cell::sync::OnceCell;

pub static MEMBER_METHODS: &[MethodDecl] = &[
    MethodDecl::derived("findAll", ReturnKind::Many).fetch(&["team"]),
    MethodDecl::derived("findByUsername", ReturnKind::Many),
    MethodDecl::derived("findByUsernameAndAgeGreaterThan", ReturnKind::Many)
        .params(&["username", "age"]),
    MethodDecl::derived("findTop3ByOrderByAgeDesc", ReturnKind::Many),
    MethodDecl::declared(
        "findUser",
        "select m from Member m where m.username = :username and m.age > :age",
        ReturnKind::Single,
    )
    .params(&["username", "age"]),
    MethodDecl::declared(
        "findUsernameList",
        "select m.username from Member m order by m.id",
        ReturnKind::Many,
    ),
    MethodDecl::declared(
        "findMemberDto",
        "select new study.datarepo.dto.MemberDto(m.id, m.username, t.name) \
         from Member m join m.team t order by m.id",
        ReturnKind::Many,
    ),
    MethodDecl::declared(
        "findByNames",
        "select m from Member m where m.username in :names order by m.id",
        ReturnKind::Many,
    )
    .params(&["names"]),
    MethodDecl::derived("findListByUsername", ReturnKind::Many),
    MethodDecl::derived("findMemberByUsername", ReturnKind::Single),
    MethodDecl::derived("findOptionalByUsername", ReturnKind::Single),
    MethodDecl::derived("findPageByUsername", ReturnKind::Page),
    MethodDecl::derived("findSliceByUsername", ReturnKind::Slice),
    MethodDecl::declared(
        "findByAge",
        "select m from Member m left join m.team t where m.age = :age",
        ReturnKind::Page,
    )
    .params(&["age"])
    .count_query("select count(m) from Member m where m.age = :age"),
    MethodDecl::declared(
        "bulkAgePlus",
        "update Member m set m.age = m.age + 1 where m.age >= :age",
        ReturnKind::Modifying,
    )
    .params(&["age"])
    .clear_automatically(),
    MethodDecl::declared(
        "findMemberFetchJoin",
        "select m from Member m left join fetch m.team t order by m.id",
        ReturnKind::Many,
    ),
    MethodDecl::declared(
        "findMemberEntityGraph",
        "select m from Member m order by m.id",
        ReturnKind::Many,
    )
    .fetch(&["team"]),
    MethodDecl::derived("findEntityGraphByUsername", ReturnKind::Many).fetch(&["team"]),
    MethodDecl::derived("findReadOnlyByUsername", ReturnKind::Single).read_only(),
    MethodDecl::derived("findLockByUsername", ReturnKind::Single).lock(LockMode::PessimisticWrite),
];

static MEMBER_REGISTRY: OnceCell<QueryRegistry> = OnceCell::new();

/// Process-wide registry for [`MEMBER_METHODS`].
pub fn member_registry() -> RepoResult<&'static QueryRegistry> {
    Ok(MEMBER_REGISTRY.get_or_try_init(|| QueryRegistry::build(&MEMBER, MEMBER_METHODS))?)
}

pub struct MemberRepository<'s, 'conn> {
    base: EntityRepository<'s, 'conn, Member>,
}

impl<'s, 'conn> MemberRepository<'s, 'conn> {
    pub fn new(session: &'s Session<'conn>) -> RepoResult<Self> {
        Ok(Self {
            base: EntityRepository::new(session, member_registry()?)?,
        })
    }

    /// Generic CRUD and by-name query access.
    pub fn entities(&self) -> &EntityRepository<'s, 'conn, Member> {
        &self.base
    }

    pub fn save(&self, member: &mut Member) -> RepoResult<()> {
        self.base.save(member)
    }

    /// Saves `team` first when it has no identifier, then joins and saves
    /// `member`, all in one boundary.
    pub fn save_in_team(&self, member: &mut Member, team: &mut Team) -> RepoResult<()> {
        self.base.session().within_boundary(TxMode::Write, |s| {
            if team.id().is_none() {
                TeamRepository::new(s)?.save(team)?;
            }
            member.change_team(team);
            self.base.save(member)
        })
    }

    pub fn find_by_id(&self, id: i64) -> RepoResult<Option<Member>> {
        self.base.find_by_id(id)
    }

    /// Every member with its team fetched, in identifier order.
    pub fn find_all(&self) -> RepoResult<Vec<Member>> {
        self.base.find_all()
    }

    pub fn count(&self) -> RepoResult<u64> {
        self.base.count()
    }

    pub fn delete(&self, member: &Member) -> RepoResult<()> {
        self.base.delete(member)
    }

    pub fn find_by_username(&self, username: &str) -> RepoResult<Vec<Member>> {
        self.base
            .query_list("findByUsername", &Args::positional([username.into()]))
    }

    pub fn find_by_username_and_age_greater_than(
        &self,
        username: &str,
        age: i32,
    ) -> RepoResult<Vec<Member>> {
        self.base.query_list(
            "findByUsernameAndAgeGreaterThan",
            &Args::positional([username.into(), age.into()]),
        )
    }

    /// Three oldest members.
    pub fn find_top3_by_order_by_age_desc(&self) -> RepoResult<Vec<Member>> {
        self.base.query_list("findTop3ByOrderByAgeDesc", &Args::None)
    }

    /// # Errors
    /// - `NonUnique` when several members share `username` above `age`.
    pub fn find_user(&self, username: &str, age: i32) -> RepoResult<Option<Member>> {
        self.base.query_single(
            "findUser",
            &Args::named([("username", username.into()), ("age", age.into())]),
        )
    }

    pub fn find_member_usernames(&self) -> RepoResult<Vec<String>> {
        self.base.query_scalars("findUsernameList", &Args::None)
    }

    /// Members that belong to a team, projected with the team name.
    pub fn find_member_dtos(&self) -> RepoResult<Vec<MemberDto>> {
        self.base.query_dtos("findMemberDto", &Args::None)
    }

    pub fn find_by_names<I, S>(&self, names: I) -> RepoResult<Vec<Member>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base
            .query_list("findByNames", &Args::named([("names", ArgValue::texts(names))]))
    }

    pub fn find_list_by_username(&self, username: &str) -> RepoResult<Vec<Member>> {
        self.base
            .query_list("findListByUsername", &Args::positional([username.into()]))
    }

    /// # Errors
    /// - `NonUnique` when several members share `username`.
    pub fn find_member_by_username(&self, username: &str) -> RepoResult<Option<Member>> {
        self.base
            .query_single("findMemberByUsername", &Args::positional([username.into()]))
    }

    pub fn find_optional_by_username(&self, username: &str) -> RepoResult<Option<Member>> {
        self.base
            .query_single("findOptionalByUsername", &Args::positional([username.into()]))
    }

    pub fn find_page_by_username(
        &self,
        username: &str,
        request: &PageRequest,
    ) -> RepoResult<Page<Member>> {
        self.base.query_page(
            "findPageByUsername",
            &Args::positional([username.into()]),
            request,
        )
    }

    pub fn find_slice_by_username(
        &self,
        username: &str,
        request: &PageRequest,
    ) -> RepoResult<Slice<Member>> {
        self.base.query_slice(
            "findSliceByUsername",
            &Args::positional([username.into()]),
            request,
        )
    }

    /// Page of members aged `age`, counted without the team join.
    pub fn find_by_age(&self, age: i32, request: &PageRequest) -> RepoResult<Page<Member>> {
        self.base
            .query_page("findByAge", &Args::named([("age", age.into())]), request)
    }

    /// Adds one year to every member aged `age` or older.
    ///
    /// Requires an active write transaction. Returns the affected count.
    pub fn bulk_age_plus(&self, age: i32) -> RepoResult<usize> {
        self.base
            .execute_modifying("bulkAgePlus", &Args::named([("age", age.into())]))
    }

    pub fn find_member_fetch_join(&self) -> RepoResult<Vec<Member>> {
        self.base.query_list("findMemberFetchJoin", &Args::None)
    }

    /// All members with teams loaded through a fetch hint on a plain query.
    pub fn find_members(&self) -> RepoResult<Vec<Member>> {
        self.base.query_list("findMemberEntityGraph", &Args::None)
    }

    pub fn find_entity_graph_by_username(&self, username: &str) -> RepoResult<Vec<Member>> {
        self.base.query_list(
            "findEntityGraphByUsername",
            &Args::positional([username.into()]),
        )
    }

    /// Results are never tracked, so changes to them are not flushed.
    pub fn find_read_only_by_username(&self, username: &str) -> RepoResult<Option<Member>> {
        self.base.query_single(
            "findReadOnlyByUsername",
            &Args::positional([username.into()]),
        )
    }

    /// Requires an active write transaction, which holds the write lock.
    pub fn find_lock_by_username(&self, username: &str) -> RepoResult<Option<Member>> {
        self.base
            .query_single("findLockByUsername", &Args::positional([username.into()]))
    }

    /// Hand-written SQL next to the declared methods.
    pub fn find_member_custom(&self) -> RepoResult<Vec<Member>> {
        let rendered = RenderedSql {
            sql: format!(
                "SELECT {} FROM members m ORDER BY m.member_id",
                Member::select_list("m")
            ),
            params: Vec::new(),
        };
        self.base.session().within_boundary(TxMode::Read, |s| {
            let rows = s.query_rows(&rendered, ReadKind::Select, |row| Member::from_row(row, 0))?;
            Ok(rows.into_iter().map(|fresh| s.attach(fresh)).collect())
        })
    }

    /// Team the member points at, loading it when it was not fetched.
    pub fn team_of(&self, member: &Member) -> RepoResult<Option<Team>> {
        if let Some(team) = member.fetched_team() {
            return Ok(Some(team.clone()));
        }
        match member.team_id() {
            Some(team_id) => TeamRepository::new(self.base.session())?.find_by_id(team_id),
            None => Ok(None),
        }
    }

    pub fn find_all_sorted(&self, sort: &Sort) -> RepoResult<Vec<Member>> {
        self.base.find_all_sorted(sort)
    }
}
