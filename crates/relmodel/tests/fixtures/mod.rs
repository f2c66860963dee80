//! Shared blog schema for relmodel integration tests.
//!
//! Tables:
//!
//! - `users`: Ada (1), Grace (2, managed by Ada), Linus (3, managed by Ada)
//! - `posts`: 10 and 11 by Ada, 12 by Grace; Linus has none
//! - `comments`: two on post 10, one on post 12
//! - `roles` / `role_user`: Ada has roles 10 and 11, Grace has role 10
//! - `tags` / `taggables`: polymorphic tags on posts and videos
//! - `images`: polymorphic images on users, posts and videos

#![allow(dead_code)]

use relmodel::prelude::*;

pub fn connection() -> MemoryConnection {
    let conn = MemoryConnection::new();

    conn.create_table("countries", &["id", "name"]);
    conn.create_table("users", &["id", "name", "country_id", "manager_id"]);
    conn.create_table("profiles", &["id", "user_id", "bio"]);
    conn.create_table("posts", &["id", "user_id", "title", "published"]);
    conn.create_table("comments", &["id", "post_id", "body", "approved"]);
    conn.create_table("roles", &["id", "name"]);
    conn.create_table("role_user", &["user_id", "role_id", "active", "granted_by"]);
    conn.create_table("tags", &["id", "name"]);
    conn.create_table("taggables", &["tag_id", "taggable_id", "taggable_type"]);
    conn.create_table("videos", &["id", "title"]);
    conn.create_table("images", &["id", "imageable_id", "imageable_type", "url"]);

    for (id, name) in [(1, "United Kingdom"), (2, "Finland"), (3, "Iceland")] {
        conn.insert("countries", [("id", Value::Int(id)), ("name", Value::from(name))]);
    }

    let users = [
        (1, "Ada", Value::Int(1), Value::Null),
        (2, "Grace", Value::Int(1), Value::Int(1)),
        (3, "Linus", Value::Int(2), Value::Int(1)),
    ];
    for (id, name, country, manager) in users {
        conn.insert(
            "users",
            [
                ("id", Value::Int(id)),
                ("name", Value::from(name)),
                ("country_id", country),
                ("manager_id", manager),
            ],
        );
    }

    conn.insert(
        "profiles",
        [
            ("id", Value::Int(1)),
            ("user_id", Value::Int(1)),
            ("bio", Value::from("Analyst")),
        ],
    );

    let posts = [
        (10, 1, "Notes on the Engine", true),
        (11, 1, "Drafts", false),
        (12, 2, "Compilers", true),
    ];
    for (id, user, title, published) in posts {
        conn.insert(
            "posts",
            [
                ("id", Value::Int(id)),
                ("user_id", Value::Int(user)),
                ("title", Value::from(title)),
                ("published", Value::Bool(published)),
            ],
        );
    }

    let comments = [
        (100, 10, "Brilliant", true),
        (101, 10, "Spam", false),
        (102, 12, "Thanks", true),
    ];
    for (id, post, body, approved) in comments {
        conn.insert(
            "comments",
            [
                ("id", Value::Int(id)),
                ("post_id", Value::Int(post)),
                ("body", Value::from(body)),
                ("approved", Value::Bool(approved)),
            ],
        );
    }

    for (id, name) in [(10, "admin"), (11, "editor"), (12, "viewer")] {
        conn.insert("roles", [("id", Value::Int(id)), ("name", Value::from(name))]);
    }
    for (user, role, active) in [(1, 10, true), (1, 11, false), (2, 10, true)] {
        conn.insert(
            "role_user",
            [
                ("user_id", Value::Int(user)),
                ("role_id", Value::Int(role)),
                ("active", Value::Bool(active)),
                ("granted_by", Value::from("system")),
            ],
        );
    }

    for (id, name) in [(1, "rust"), (2, "databases")] {
        conn.insert("tags", [("id", Value::Int(id)), ("name", Value::from(name))]);
    }
    for (tag, owner, kind) in [(1, 10, "post"), (2, 10, "post"), (1, 1, "video")] {
        conn.insert(
            "taggables",
            [
                ("tag_id", Value::Int(tag)),
                ("taggable_id", Value::Int(owner)),
                ("taggable_type", Value::from(kind)),
            ],
        );
    }

    conn.insert("videos", [("id", Value::Int(1)), ("title", Value::from("Talk"))]);

    let images = [
        (1, Value::Int(1), Value::from("User"), "ada.png"),
        (2, Value::Int(10), Value::from("post"), "engine.png"),
        (3, Value::Int(1), Value::from("video"), "talk.png"),
        (4, Value::Int(99), Value::from("post"), "orphan.png"),
        (5, Value::Null, Value::Null, "unattached.png"),
    ];
    for (id, owner, kind, url) in images {
        conn.insert(
            "images",
            [
                ("id", Value::Int(id)),
                ("imageable_id", owner),
                ("imageable_type", kind),
                ("url", Value::from(url)),
            ],
        );
    }

    conn
}

fn entity(name: &str, table: &str) -> EntityDef {
    EntityDef::builder(name, table)
        .timestamps(false)
        .build()
        .unwrap()
}

pub fn registry(conn: &MemoryConnection) -> Registry {
    let mut registry = Registry::for_connection(conn);
    for (name, table) in [
        ("Country", "countries"),
        ("User", "users"),
        ("Profile", "profiles"),
        ("Post", "posts"),
        ("Comment", "comments"),
        ("Role", "roles"),
        ("Tag", "tags"),
        ("Video", "videos"),
        ("Image", "images"),
    ] {
        registry.register(entity(name, table));
    }
    registry.morph_map("post", "Post").morph_map("video", "Video");

    registry
        .define("Country", "users", |r: &Relate<'_>| r.has_many("User"))
        .define("Country", "posts", |r: &Relate<'_>| r.has_many_through("Post", "User"))
        .define("Country", "first_post", |r: &Relate<'_>| {
            r.has_one_through("Post", "User")
        });

    registry
        .define("User", "posts", |r: &Relate<'_>| r.has_many("Post"))
        .define("User", "profile", |r: &Relate<'_>| r.has_one("Profile"))
        .define("User", "profile_or_blank", |r: &Relate<'_>| {
            r.has_one("Profile").map(|rel| {
                rel.with_default_model(DefaultModel::attributes([("bio", "No bio yet")]))
            })
        })
        .define("User", "country", |r: &Relate<'_>| r.belongs_to("Country"))
        .define("User", "manager", |r: &Relate<'_>| r.belongs_to("User"))
        .define("User", "manager_or_default", |r: &Relate<'_>| {
            r.belongs_to("User").map(|rel| {
                rel.with_foreign_key("manager_id")
                    .with_default_model(DefaultModel::attributes([("name", "Nobody")]))
            })
        })
        .define("User", "reports", |r: &Relate<'_>| {
            r.has_many("User").map(|rel| rel.with_foreign_key("manager_id"))
        })
        .define("User", "roles", |r: &Relate<'_>| {
            r.belongs_to_many("Role").map(|rel| rel.with_pivot(["active"]))
        })
        .define("User", "active_roles", |r: &Relate<'_>| {
            r.belongs_to_many("Role")
                .map(|rel| rel.where_pivot("active", true).accessor("grant"))
        })
        .define("User", "avatar", |r: &Relate<'_>| r.morph_one("Image", "imageable"))
        .define("User", "broken", |_: &Relate<'_>| None::<Relation>);

    registry
        .define("Post", "user", |r: &Relate<'_>| r.belongs_to("User"))
        .define("Post", "comments", |r: &Relate<'_>| r.has_many("Comment"))
        .define("Post", "tags", |r: &Relate<'_>| r.morph_to_many("Tag", "taggable"))
        .define("Post", "images", |r: &Relate<'_>| r.morph_many("Image", "imageable"));

    registry
        .define("Comment", "post", |r: &Relate<'_>| r.belongs_to("Post"))
        .define("Role", "users", |r: &Relate<'_>| r.belongs_to_many("User"))
        .define("Video", "tags", |r: &Relate<'_>| r.morph_to_many("Tag", "taggable"))
        .define("Tag", "posts", |r: &Relate<'_>| r.morphed_by_many("Post", "taggable"))
        .define("Tag", "videos", |r: &Relate<'_>| r.morphed_by_many("Video", "taggable"))
        .define("Image", "imageable", |r: &Relate<'_>| r.morph_to())
        .define("Image", "imageable_or_blank", |r: &Relate<'_>| {
            r.morph_to()
                .with_type_column("imageable_type")
                .with_id_column("imageable_id")
                .with_default()
        });

    registry
}

/// Session over the blog schema with the query log cleared.
pub fn session() -> Session<MemoryConnection> {
    let conn = connection();
    let registry = registry(&conn);
    Session::new(conn, registry)
}

pub fn session_with(config: SessionConfig) -> Session<MemoryConnection> {
    let conn = connection();
    let registry = registry(&conn);
    Session::with_config(conn, registry, config)
}

/// Queries issued by `f` against `session`'s connection.
pub fn queries_during<T>(
    session: &Session<MemoryConnection>,
    f: impl FnOnce() -> T,
) -> (T, Vec<String>) {
    session.connection().reset_log();
    let out = f();
    (out, session.connection().queries())
}

pub fn names(entities: &[Entity]) -> Vec<String> {
    entities
        .iter()
        .map(|e| e.get_raw("name").as_str().unwrap_or_default().to_string())
        .collect()
}

pub fn ids(entities: &[Entity]) -> Vec<i64> {
    entities.iter().filter_map(|e| e.key().as_i64()).collect()
}
