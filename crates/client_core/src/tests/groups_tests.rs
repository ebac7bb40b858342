use super::*;
use crate::test_support::{group, server_error, FakeGateway};

async fn seeded() -> (Arc<FakeGateway>, GroupDirectory) {
    let fake = Arc::new(FakeGateway::default());
    *fake.groups.lock().await = vec![group("g1", "ops")];
    let directory = GroupDirectory::new(fake.clone());
    directory.fetch_groups().await.expect("list");
    (fake, directory)
}

#[tokio::test]
async fn create_appends_and_delete_clears_current() {
    let (_fake, directory) = seeded().await;

    let created = directory
        .create(&GroupRequest {
            name: Some("dev".into()),
            ..GroupRequest::default()
        })
        .await
        .expect("create");
    assert_eq!(directory.groups().await.last(), Some(&created));

    directory.fetch_group(&created.id).await.expect("get");
    directory.delete(&created.id).await.expect("delete");

    assert_eq!(directory.groups().await.len(), 1);
    assert_eq!(directory.current().await, None);
}

#[tokio::test]
async fn update_replaces_in_place() {
    let (_fake, directory) = seeded().await;

    directory
        .update(
            &GroupId::from("g1"),
            &GroupRequest {
                name: Some("renamed".into()),
                ..GroupRequest::default()
            },
        )
        .await
        .expect("update");

    assert_eq!(directory.groups().await[0].name, "renamed");
}

#[tokio::test]
async fn add_member_defaults_to_member_role() {
    let (_fake, directory) = seeded().await;
    let g1 = GroupId::from("g1");

    let member = directory
        .add_member(&g1, UserId::from("u2"), None)
        .await
        .expect("add");
    let admin = directory
        .add_member(&g1, UserId::from("u3"), Some(GroupRole::Admin))
        .await
        .expect("add admin");

    assert_eq!(member.role, GroupRole::Member);
    assert_eq!(admin.role, GroupRole::Admin);
    assert_eq!(directory.members().await.len(), 2);

    directory.remove_member(&g1, &member.id).await.expect("remove");
    assert_eq!(directory.members().await, vec![admin]);
}

#[tokio::test]
async fn role_change_refetches_members() {
    let (fake, directory) = seeded().await;
    let g1 = GroupId::from("g1");
    let member = directory
        .add_member(&g1, UserId::from("u2"), None)
        .await
        .expect("add");

    let members = directory
        .update_member_role(&g1, &member.id, GroupRole::Admin)
        .await
        .expect("role");

    assert_eq!(members[0].role, GroupRole::Admin);
    assert_eq!(directory.members().await, members);
    assert_eq!(
        fake.calls().await,
        vec!["list_groups", "add_member", "update_member_role", "list_members"]
    );
    assert!(!directory.status().is_loading());
}

#[tokio::test]
async fn failures_use_group_fallbacks() {
    let (fake, directory) = seeded().await;
    *fake.fail_with.lock().await = Some(server_error(500, None));

    directory
        .add_member(&GroupId::from("g1"), UserId::from("u2"), None)
        .await
        .expect_err("add fails");

    assert_eq!(
        directory.status().error(),
        Some("Failed to add member to group")
    );
    assert!(directory.members().await.is_empty());
}

#[tokio::test]
async fn leave_forgets_the_group_and_its_members() {
    let (fake, directory) = seeded().await;
    let g1 = GroupId::from("g1");
    directory.fetch_group(&g1).await.expect("get");
    directory
        .add_member(&g1, UserId::from("u2"), None)
        .await
        .expect("add");

    directory.leave(&g1).await.expect("leave");

    assert!(directory.groups().await.is_empty());
    assert_eq!(directory.current().await, None);
    assert!(directory.members().await.is_empty());
    assert!(fake.calls().await.contains(&"leave_group".to_string()));
}

#[tokio::test]
async fn rename_and_photo_update_cached_copies() {
    let (fake, directory) = seeded().await;
    let g1 = GroupId::from("g1");
    directory.fetch_group(&g1).await.expect("get");

    directory.rename(&g1, "renamed").await.expect("rename");
    let response = directory
        .set_photo(&g1, PhotoUpload::new("team.png", vec![1, 2, 3]))
        .await
        .expect("photo");

    assert_eq!(response.photo, "/photos/g1/team.png");
    let listed = directory.groups().await;
    assert_eq!(listed[0].name, "renamed");
    assert_eq!(listed[0].photo.as_deref(), Some("/photos/g1/team.png"));
    assert_eq!(directory.current().await, Some(listed[0].clone()));
    assert_eq!(fake.photos.lock().await[0].content_type, "image/png");
}

#[tokio::test]
async fn failed_rename_keeps_the_cached_name() {
    let (fake, directory) = seeded().await;
    *fake.fail_with.lock().await = Some(server_error(403, Some("not in group")));

    directory
        .rename(&GroupId::from("g1"), "renamed")
        .await
        .expect_err("forbidden");

    assert_eq!(directory.groups().await[0].name, "ops");
    assert_eq!(directory.status().error(), Some("not in group"));
}
