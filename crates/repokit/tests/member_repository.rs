use std::sync::Arc;

use repokit::prelude::*;
use repokit::{AssociationInfo, ErrorKind, EntityShape, FieldInfo, FieldType};

fn registry() -> Arc<Registry> {
    Arc::new(
        Registry::builder()
            .entity(
                EntityShape::new("Team", "id", FieldType::BigInt)
                    .field(FieldInfo::new("name", FieldType::Text))
                    .association(AssociationInfo::many("members", "Member", "team_id")),
            )
            .entity(
                EntityShape::new("Member", "id", FieldType::BigInt)
                    .field(FieldInfo::new("username", FieldType::Text))
                    .field(FieldInfo::new("age", FieldType::Integer).nullable(true))
                    .field(FieldInfo::new("team_id", FieldType::BigInt).nullable(true))
                    .association(AssociationInfo::one("team", "Team", "team_id")),
            )
            .build()
            .unwrap(),
    )
}

fn open() -> (Arc<MemoryStore>, Session<Arc<MemoryStore>>) {
    let registry = registry();
    let store = Arc::new(MemoryStore::new(Arc::clone(&registry)));
    (Arc::clone(&store), Session::new(store, registry))
}

fn member(username: &str, age: i32) -> Entity {
    Entity::new("Member")
        .with("username", username)
        .with("age", age)
}

fn id_of(e: &EntityRef) -> Value {
    entity::read(e).get("id").cloned().unwrap()
}

fn username(e: &EntityRef) -> String {
    entity::read(e).get_as("username").unwrap()
}

fn by_username(name: &str) -> QueryRequest {
    QueryRequest::new("Member").filter(field("username").eq(name))
}

#[test]
fn saved_member_is_found_by_identity() {
    let (_, mut session) = open();
    let saved = session
        .persist(Entity::new("Member").with("username", "memberA"))
        .unwrap();

    let found = session.find("Member", id_of(&saved)).unwrap().unwrap();
    assert!(Arc::ptr_eq(&saved, &found));
    assert_eq!(username(&found), "memberA");
    assert_eq!(entity::read(&found).get("age"), Some(&Value::Null));
}

#[test]
fn basic_crud() {
    let (store, mut session) = open();
    let member1 = session.persist(member("member1", 10)).unwrap();
    let member2 = session.persist(member("member2", 20)).unwrap();
    session.flush().unwrap();

    session.clear();
    let found1 = session.find("Member", id_of(&member1)).unwrap().unwrap();
    let found2 = session.find("Member", id_of(&member2)).unwrap().unwrap();
    assert_eq!(username(&found1), "member1");
    assert_eq!(username(&found2), "member2");

    assert_eq!(session.find_all("Member").unwrap().len(), 2);
    assert_eq!(session.count(&QueryRequest::new("Member")).unwrap(), 2);

    session.remove(&found1).unwrap();
    session.remove(&found2).unwrap();
    session.flush().unwrap();
    assert_eq!(session.count(&QueryRequest::new("Member")).unwrap(), 0);
    assert_eq!(store.row_count("Member"), 0);
}

#[test]
fn derived_query_by_username_and_age() {
    let (_, mut session) = open();
    let m1 = session.persist(member("AAA", 10)).unwrap();
    session.persist(member("BBB", 20)).unwrap();
    session.flush().unwrap();

    let result = session
        .query(
            &QueryRequest::new("Member")
                .filter(field("username").eq("AAA"))
                .filter(field("age").eq(10)),
        )
        .unwrap();
    assert_eq!(result.len(), 1);
    assert!(Arc::ptr_eq(&result[0], &m1));

    let older = session
        .query(
            &QueryRequest::new("Member")
                .filter(field("username").eq("AAA"))
                .filter(field("age").gt(15)),
        )
        .unwrap();
    assert!(older.is_empty());
}

#[test]
fn username_projection_and_team_join() {
    let (_, mut session) = open();
    let team = session.persist(Entity::new("Team").with("name", "teamA")).unwrap();
    session
        .persist(member("AAA", 10).with("team_id", id_of(&team)))
        .unwrap();
    session.persist(member("BBB", 20)).unwrap();
    session.flush().unwrap();

    let names = session
        .project(&QueryRequest::new("Member").project(["username"]))
        .unwrap();
    let names: Vec<String> = names
        .iter()
        .map(|row| row.get_named("username").unwrap())
        .collect();
    assert_eq!(names, vec!["AAA", "BBB"]);

    let dtos = session
        .project(
            &QueryRequest::new("Member")
                .filter(field("team_id").is_not_null())
                .project(["id", "username", "team.name"]),
        )
        .unwrap();
    assert_eq!(dtos.len(), 1);
    assert_eq!(dtos[0].get_named::<String>("username").unwrap(), "AAA");
    assert_eq!(dtos[0].get_named::<String>("team.name").unwrap(), "teamA");
}

#[test]
fn find_by_names_in_list() {
    let (_, mut session) = open();
    session.persist(member("AAA", 10)).unwrap();
    session.persist(member("BBB", 20)).unwrap();
    session.persist(member("CCC", 30)).unwrap();
    session.flush().unwrap();

    let members = session
        .query(&QueryRequest::new("Member").filter(field("username").is_in(["AAA", "BBB"])))
        .unwrap();
    let names: Vec<String> = members.iter().map(username).collect();
    assert_eq!(names, vec!["AAA", "BBB"]);
}

#[test]
fn return_shapes() {
    let (_, mut session) = open();
    for (name, age) in [("AAA", 10), ("BBB", 20), ("CCC", 30)] {
        session.persist(member(name, age)).unwrap();
    }
    session.flush().unwrap();

    // list: empty rather than absent
    assert_eq!(session.query(&by_username("AAA")).unwrap().len(), 1);
    assert!(session.query(&by_username("fdjk")).unwrap().is_empty());

    // single: exactly one
    assert_eq!(username(&session.get_one(&by_username("BBB")).unwrap()), "BBB");
    let err = session.get_one(&by_username("fjdk")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // optional: at most one
    assert!(session.find_one(&by_username("CCC")).unwrap().is_some());
    assert!(session.find_one(&by_username("fjdk")).unwrap().is_none());

    session.persist(member("CCC", 31)).unwrap();
    session.flush().unwrap();
    let err = session.find_one(&by_username("CCC")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NonUniqueResult);
}

#[test]
fn paging_by_age() {
    let (_, mut session) = open();
    for i in 1..=5 {
        session.persist(member(&format!("member{i}"), 10)).unwrap();
    }
    session.flush().unwrap();

    let request = QueryRequest::new("Member")
        .filter(field("age").eq(10))
        .page(&PageRequest::of(0, 3).sort(OrderBy::desc("username")));

    let page = session.page(&request).unwrap();
    assert_eq!(page.number_of_elements(), 3);
    assert_eq!(page.total_elements(), 5);
    assert_eq!(page.number(), 0);
    assert_eq!(page.total_pages(), 2);
    assert!(page.is_first());
    assert!(page.has_next());
    let names: Vec<String> = page.content().iter().map(username).collect();
    assert_eq!(names, vec!["member5", "member4", "member3"]);

    let dto = page.map(|m| username(&m).to_uppercase());
    assert_eq!(dto.content()[0], "MEMBER5");
    assert_eq!(dto.total_elements(), 5);

    let slice = session.slice(&request).unwrap();
    assert_eq!(slice.number_of_elements(), 3);
    assert_eq!(slice.number(), 0);
    assert!(slice.is_first());
    assert!(slice.has_next());
}

#[test]
fn every_page_adds_up_to_the_total() {
    let (_, mut session) = open();
    for i in 0..7 {
        session.persist(member(&format!("m{i}"), 10 + i)).unwrap();
    }
    session.flush().unwrap();

    for size in 1..=8 {
        let base = QueryRequest::new("Member").filter(field("age").ge(11));
        let first = session.page(&base.clone().window(0, size)).unwrap();
        let mut seen = 0;
        for number in 0..first.total_pages() {
            let page = session
                .page(&base.clone().page(&PageRequest::of(number, size)))
                .unwrap();
            seen += page.number_of_elements() as u64;
        }
        assert_eq!(seen, first.total_elements());
        assert_eq!(first.total_pages(), first.total_elements().div_ceil(size));
    }
}

#[test]
fn bulk_age_plus() {
    let (store, mut session) = open();
    for (i, age) in [10, 19, 20, 21, 40].into_iter().enumerate() {
        session
            .persist(member(&format!("member{}", i + 1), age))
            .unwrap();
    }
    // unflushed instances are not visible to queries
    assert!(session.find_one(&by_username("member5")).unwrap().is_none());
    session.flush().unwrap();
    let member5 = session.get_one(&by_username("member5")).unwrap();

    let affected = session
        .bulk_update(
            "Member",
            &field("age").ge(20).into(),
            &[Assignment::add("age", 1)],
            BulkOptions::default(),
        )
        .unwrap();
    assert_eq!(affected, 3);
    assert_eq!(store.peek("Member", &id_of(&member5), "age"), Some(Value::Int(41)));

    // the tracked instance is refreshed on the next read
    assert!(session.is_stale(&member5));
    let again = session.get_one(&by_username("member5")).unwrap();
    assert!(Arc::ptr_eq(&again, &member5));
    assert_eq!(entity::read(&again).get_as::<i32>("age").unwrap(), 41);
}

#[test]
fn bulk_age_plus_with_reconcile() {
    let (_, mut session) = open();
    for (i, age) in [10, 19, 20, 21, 40].into_iter().enumerate() {
        session
            .persist(member(&format!("member{}", i + 1), age))
            .unwrap();
    }
    session.flush().unwrap();
    let before = session.get_one(&by_username("member5")).unwrap();

    let affected = session
        .bulk_update(
            "Member",
            &field("age").ge(20).into(),
            &[Assignment::add("age", 1)],
            BulkOptions::new().auto_reconcile(true),
        )
        .unwrap();
    assert_eq!(affected, 3);
    assert!(!session.contains(&before));

    let after = session.get_one(&by_username("member5")).unwrap();
    assert_eq!(entity::read(&after).get_as::<i32>("age").unwrap(), 41);
}

fn seed_teams(session: &mut Session<Arc<MemoryStore>>) {
    let team_a = session.persist(Entity::new("Team").with("name", "teamA")).unwrap();
    let team_b = session.persist(Entity::new("Team").with("name", "teamB")).unwrap();
    session
        .persist(member("member1", 10).with("team_id", id_of(&team_a)))
        .unwrap();
    session
        .persist(member("member2", 10).with("team_id", id_of(&team_b)))
        .unwrap();
    session
        .persist(member("member1", 10).with("team_id", id_of(&team_a)))
        .unwrap();
    session.flush().unwrap();
    session.clear();
}

fn team_name(session: &mut Session<Arc<MemoryStore>>, m: &EntityRef) -> String {
    let team = session.resolve(m, "team").unwrap();
    let team = team.as_one().unwrap();
    entity::read(team).get_as("name").unwrap()
}

#[test]
fn lazy_team_costs_a_read_per_distinct_team() {
    let (store, mut session) = open();
    seed_teams(&mut session);
    store.reset_stats();

    let members = session.find_all("Member").unwrap();
    assert_eq!(store.stats().reads, 1);
    assert!(!entity::read(&members[0]).association("team").unwrap().is_resolved());

    let names: Vec<String> = members.iter().map(|m| team_name(&mut session, m)).collect();
    assert_eq!(names, vec!["teamA", "teamB", "teamA"]);
    // teamA is loaded once and shared through the identity map
    assert_eq!(store.stats().reads_of("Team"), 2);

    // a second pass is free
    for m in &members {
        team_name(&mut session, m);
    }
    assert_eq!(store.stats().reads, 3);
}

#[test]
fn fetch_join_loads_teams_in_one_read() {
    let (store, mut session) = open();
    seed_teams(&mut session);
    store.reset_stats();

    let members = session
        .query(&QueryRequest::new("Member").fetch("team"))
        .unwrap();
    assert_eq!(members.len(), 3);
    let names: Vec<String> = members.iter().map(|m| team_name(&mut session, m)).collect();
    assert_eq!(names, vec!["teamA", "teamB", "teamA"]);
    assert_eq!(store.stats().reads, 1);
}

#[test]
fn fetch_hint_with_username_filter() {
    let (store, mut session) = open();
    seed_teams(&mut session);
    store.reset_stats();

    let members = session
        .query(
            &QueryRequest::new("Member")
                .filter(field("username").eq("member1"))
                .fetch("team"),
        )
        .unwrap();
    assert_eq!(members.len(), 2);
    for m in &members {
        assert_eq!(team_name(&mut session, m), "teamA");
    }
    assert_eq!(store.stats().reads, 1);
}

#[test]
fn batched_resolution_of_a_result_list() {
    let (store, mut session) = open();
    seed_teams(&mut session);

    let members = session.find_all("Member").unwrap();
    store.reset_stats();
    session.resolve_all(&members, "team").unwrap();
    assert_eq!(store.stats().reads, 1);

    let teams = session.find_all("Team").unwrap();
    store.reset_stats();
    session.resolve_all(&teams, "members").unwrap();
    assert_eq!(store.stats().reads, 1);
    assert_eq!(session.resolve(&teams[0], "members").unwrap().len(), 2);
    assert_eq!(store.stats().reads, 1);
}

#[test]
fn store_failure_surfaces_unchanged() {
    let (store, mut session) = open();
    seed_teams(&mut session);
    store.set_available(false);
    let err = session.find_all("Member").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreUnavailable);

    // structural errors are reported before any store access
    let err = session.find_all("Order").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownEntityType);
    let err = session
        .query(&QueryRequest::new("Member").filter(field("nickname").eq("x")))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownField);
}
