mod fixtures;

use fixtures::{ids, names, queries_during, session};
use relmodel::prelude::*;

#[test]
fn morph_to_issues_one_query_per_owner_type() {
    let session = session();
    let (images, queries) = queries_during(&session, || {
        session
            .query("Image")
            .unwrap()
            .with("imageable")
            .get()
            .unwrap()
    });

    // images, then User, Post and Video in first-seen order
    assert_eq!(queries.len(), 4);
    assert!(queries[1].contains("FROM \"users\""), "{}", queries[1]);
    assert!(queries[2].contains("FROM \"posts\""), "{}", queries[2]);
    assert!(queries[2].contains("IN (10, 99)"), "{}", queries[2]);
    assert!(queries[3].contains("FROM \"videos\""), "{}", queries[3]);

    let owner = |i: usize| images[i].related_one("imageable");
    assert_eq!(owner(0).unwrap().name(), "User");
    assert_eq!(owner(0).unwrap().get_raw("name"), &Value::from("Ada"));
    assert_eq!(owner(1).unwrap().name(), "Post");
    assert_eq!(owner(1).unwrap().key(), &Value::Int(10));
    assert_eq!(owner(2).unwrap().name(), "Video");
    assert!(owner(3).is_none());
    assert!(owner(4).is_none());
    assert!(images.iter().all(|i| i.relation_loaded("imageable")));
}

#[test]
fn morph_to_default_needs_a_stored_type() {
    let session = session();
    let images = session
        .query("Image")
        .unwrap()
        .with("imageable_or_blank")
        .get()
        .unwrap();

    let orphan = images[3].related_one("imageable_or_blank").unwrap();
    assert_eq!(orphan.name(), "Post");
    assert!(!orphan.exists());

    // No type stored, so there is nothing to instantiate.
    assert!(images[4].related_one("imageable_or_blank").is_none());
}

#[test]
fn nested_paths_continue_per_owner_type() {
    let session = session();
    let (images, queries) = queries_during(&session, || {
        session
            .query("Image")
            .unwrap()
            .where_in("imageable_type", vec![Value::from("post"), Value::from("video")])
            .with("imageable.tags")
            .get()
            .unwrap()
    });

    // images, posts, videos, post tags, video tags
    assert_eq!(queries.len(), 5);
    let post = images[0].related_one("imageable").unwrap();
    assert_eq!(names(post.related_many("tags")), vec!["rust", "databases"]);
    let video = images[1].related_one("imageable").unwrap();
    assert_eq!(names(video.related_many("tags")), vec!["rust"]);
}

#[test]
fn morph_one_and_many_filter_on_the_type_column() {
    let session = session();
    let (users, queries) = queries_during(&session, || {
        session.query("User").unwrap().with("avatar").get().unwrap()
    });
    assert!(
        queries[1].contains("\"images\".\"imageable_type\" = $1"),
        "{}",
        queries[1]
    );
    assert_eq!(
        users[0].related_one("avatar").unwrap().get_raw("url"),
        &Value::from("ada.png")
    );
    assert!(users[1].related_one("avatar").is_none());

    let posts = session.query("Post").unwrap().with("images").get().unwrap();
    assert_eq!(ids(posts[0].related_many("images")), vec![2]);
    assert!(posts[1].related_many("images").is_empty());
}

#[test]
fn morph_map_aliases_are_stored_and_resolved() {
    let session = session();
    let registry = session.registry();
    assert_eq!(registry.morph_class("Post"), "post");
    assert_eq!(registry.morph_class("User"), "User");
    assert_eq!(registry.resolve_morph("video").unwrap().name(), "Video");
}

#[test]
fn unknown_morph_type_is_a_configuration_error() {
    let session = session();
    session.connection().insert(
        "images",
        [
            ("id", Value::Int(6)),
            ("imageable_id", Value::Int(1)),
            ("imageable_type", Value::from("Podcast")),
            ("url", Value::from("episode.png")),
        ],
    );

    let err = session
        .query("Image")
        .unwrap()
        .with("imageable")
        .get()
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err}");
    assert!(err.is_programmer_error());
}

#[test]
fn lazy_morph_to_resolves_a_single_owner() {
    let mut session = session();
    let mut image = session.find_or_fail("Image", 3).unwrap();
    let video = session.related_one_or_fail(&mut image, "imageable").unwrap();
    assert_eq!(video.get_raw("title"), &Value::from("Talk"));

    let mut orphan = session.find_or_fail("Image", 4).unwrap();
    let err = session
        .related_one_or_fail(&mut orphan, "imageable")
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "No query results for entity [Image.imageable] 4");
}
