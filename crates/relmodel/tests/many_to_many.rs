mod fixtures;

use fixtures::{ids, names, queries_during, session, session_with};
use relmodel::prelude::*;
use relmodel::pivot_of;

#[test]
fn pivot_records_are_attached_per_parent() {
    let session = session();
    let (users, queries) = queries_during(&session, || {
        session
            .query("User")
            .unwrap()
            .where_in("id", vec![Value::Int(1), Value::Int(2)])
            .with("roles")
            .get()
            .unwrap()
    });

    assert_eq!(queries.len(), 2);
    let sql = &queries[1];
    assert!(sql.contains("\"role_user\".\"user_id\" AS \"pivot_user_id\""), "{sql}");
    assert!(sql.contains("\"role_user\".\"role_id\" AS \"pivot_role_id\""), "{sql}");
    assert!(sql.contains("\"role_user\".\"active\" AS \"pivot_active\""), "{sql}");
    assert!(!sql.contains("granted_by"), "{sql}");
    assert!(sql.contains("IN (1, 2)"), "{sql}");

    let ada_roles = users[0].related_many("roles");
    assert_eq!(ids(ada_roles), vec![10, 11]);
    assert_eq!(ids(users[1].related_many("roles")), vec![10]);

    for role in ada_roles {
        assert!(role.attributes().keys().all(|k| !k.starts_with("pivot_")));
        assert!(role.is_clean(&[]));
        let pivot = pivot_of(role, "pivot").unwrap();
        assert_eq!(pivot.name(), "Pivot");
        assert_eq!(pivot.table(), "role_user");
        assert_eq!(pivot.get_raw("user_id"), &Value::Int(1));
        assert_eq!(pivot.get_raw("role_id"), role.key());
    }

    // The same role under another parent carries that parent's pivot.
    let grace_admin = &users[1].related_many("roles")[0];
    assert_eq!(
        pivot_of(grace_admin, "pivot").unwrap().get_raw("user_id"),
        &Value::Int(2)
    );
    assert_eq!(
        pivot_of(&ada_roles[1], "pivot").unwrap().get_raw("active"),
        &Value::Bool(false)
    );
}

#[test]
fn pivot_filters_and_custom_accessor() {
    let session = session();
    let users = session
        .query("User")
        .unwrap()
        .with("active_roles")
        .get()
        .unwrap();

    assert_eq!(ids(users[0].related_many("active_roles")), vec![10]);
    assert_eq!(ids(users[1].related_many("active_roles")), vec![10]);
    assert!(users[2].related_many("active_roles").is_empty());

    let role = &users[0].related_many("active_roles")[0];
    assert!(pivot_of(role, "grant").is_some());
    assert!(pivot_of(role, "pivot").is_none());
}

#[test]
fn session_wide_pivot_accessor() {
    let session = session_with(SessionConfig::new().pivot_accessor("membership"));
    let users = session.query("User").unwrap().with("roles").get().unwrap();
    let role = &users[0].related_many("roles")[0];
    assert!(pivot_of(role, "membership").is_some());
    assert!(pivot_of(role, "pivot").is_none());
}

#[test]
fn inverse_side_uses_the_same_joining_table() {
    let session = session();
    let roles = session
        .query("Role")
        .unwrap()
        .order_by("id")
        .with("users")
        .get()
        .unwrap();

    assert_eq!(names(roles[0].related_many("users")), vec!["Ada", "Grace"]);
    assert_eq!(names(roles[1].related_many("users")), vec!["Ada"]);
    assert!(roles[2].related_many("users").is_empty());

    let pivot = pivot_of(&roles[0].related_many("users")[1], "pivot").unwrap();
    assert_eq!(pivot.get_raw("role_id"), &Value::Int(10));
    assert_eq!(pivot.get_raw("user_id"), &Value::Int(2));
}

#[test]
fn polymorphic_many_to_many_filters_on_the_owner_type() {
    let session = session();
    let posts = session.query("Post").unwrap().with("tags").get().unwrap();
    assert_eq!(names(posts[0].related_many("tags")), vec!["rust", "databases"]);
    assert!(posts[2].related_many("tags").is_empty());

    let pivot = pivot_of(&posts[0].related_many("tags")[0], "pivot").unwrap();
    assert_eq!(pivot.name(), "MorphPivot");
    assert_eq!(pivot.get_raw("taggable_type"), &Value::from("post"));
    assert_eq!(pivot.get_raw("taggable_id"), &Value::Int(10));

    let videos = session.query("Video").unwrap().with("tags").get().unwrap();
    assert_eq!(names(videos[0].related_many("tags")), vec!["rust"]);
}

#[test]
fn morphed_by_many_resolves_each_owner_type() {
    let session = session();
    let (tags, queries) = queries_during(&session, || {
        session
            .query("Tag")
            .unwrap()
            .with_plan(["posts", "videos"])
            .get()
            .unwrap()
    });

    assert_eq!(queries.len(), 3);
    assert!(queries[1].contains("\"taggables\".\"taggable_type\" = $1"), "{}", queries[1]);

    assert_eq!(ids(tags[0].related_many("posts")), vec![10]);
    assert_eq!(ids(tags[1].related_many("posts")), vec![10]);
    assert_eq!(ids(tags[0].related_many("videos")), vec![1]);
    assert!(tags[1].related_many("videos").is_empty());
}

#[test]
fn lazy_many_to_many_synthesizes_pivots() {
    let mut session = session();
    let mut user = session.find_or_fail("User", 1).unwrap();
    let roles = session.load_relation(&mut user, "roles").unwrap().as_many();
    assert_eq!(roles.len(), 2);
    assert!(roles.iter().all(|r| pivot_of(r, "pivot").is_some()));
}

#[test]
fn pivots_serialize_with_their_related_entity() {
    let session = session();
    let users = session.query("User").unwrap().with("roles").get().unwrap();
    let json = users[0].to_array().unwrap();

    let first_role = &json["roles"][0];
    assert_eq!(first_role["name"], "admin");
    assert_eq!(first_role["pivot"]["user_id"], 1);
    assert_eq!(first_role["pivot"]["active"], true);
    assert!(first_role.get("pivot_user_id").is_none());
}
