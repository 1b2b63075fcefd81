//! Admin area access and user management

use axum::{
    body::Body,
    http::{header, Method, StatusCode},
};
use rstest::rstest;
use serde_json::Value;

use crate::common::*;

#[rstest]
#[case::admin(Some(UserKind::Admin), StatusCode::OK)]
#[case::member(Some(UserKind::Member), StatusCode::FORBIDDEN)]
#[case::anonymous(None, StatusCode::UNAUTHORIZED)]
#[tokio::test]
async fn test_admin_area_access(#[case] kind: Option<UserKind>, #[case] expected: StatusCode) {
    let app = TestApp::new().await;
    let cookie = match kind {
        Some(kind) => {
            let user = create_user(&app, "visitor", kind).await;
            Some(login(&app, &user).await.cookie)
        }
        None => None,
    };

    let response = app.get_json("/admin/users", cookie.as_deref()).await;
    response.assert_status(expected);

    if expected == StatusCode::FORBIDDEN {
        let body: Value = response.json();
        assert_eq!(body["error"], "forbidden");
        assert_eq!(body["messages"][0]["text"], "You must be admin.");
    }
    if expected == StatusCode::UNAUTHORIZED {
        let body: Value = response.json();
        assert_eq!(body["error"], "unauthenticated");
        assert_eq!(body["redirect"], "/login");
    }
}

#[tokio::test]
async fn test_anonymous_browser_is_sent_to_login() {
    let app = TestApp::new().await;

    app.get("/admin/users").await.assert_redirect("/login");
}

#[tokio::test]
async fn test_member_browser_is_redirected_home() {
    let app = TestApp::new().await;
    let member = create_user(&app, "member", UserKind::Member).await;
    let session = login(&app, &member).await;

    let response = app
        .send(
            app.build(Method::GET, "/admin/users")
                .header(header::COOKIE, &session.cookie),
            Body::empty(),
        )
        .await;
    response.assert_redirect("/");

    let index: Value = app.get_json("/", Some(&session.cookie)).await.json();
    assert_eq!(index["messages"][0]["text"], "You must be admin.");
}

#[tokio::test]
async fn test_admin_lists_users() {
    let app = TestApp::new().await;
    let admin = create_user(&app, "root", UserKind::Admin).await;
    create_user(&app, "member", UserKind::Member).await;
    let session = login(&app, &admin).await;

    let users: Value = app.get_json("/admin/users", Some(&session.cookie)).await.json();
    let users = users.as_array().unwrap();
    assert_eq!(users.len(), 2);
    assert!(users.iter().all(|u| u.get("password_hash").is_none()));
}

#[tokio::test]
async fn test_admin_deletes_user_and_their_session_goes_anonymous() {
    let app = TestApp::new().await;
    let admin = create_user(&app, "root", UserKind::Admin).await;
    let member = create_user(&app, "member", UserKind::Member).await;
    let admin_session = login(&app, &admin).await;
    let member_session = login(&app, &member).await;

    let response = app
        .send(
            admin_session.apply(app.build(Method::DELETE, &format!("/admin/users/{}", member.id))),
            Body::empty(),
        )
        .await;
    response.assert_status(StatusCode::NO_CONTENT);

    app.get_json("/me", Some(&member_session.cookie))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let again = app
        .send(
            admin_session.apply(app.build(Method::DELETE, &format!("/admin/users/{}", member.id))),
            Body::empty(),
        )
        .await;
    again.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_cannot_delete_self() {
    let app = TestApp::new().await;
    let admin = create_user(&app, "root", UserKind::Admin).await;
    let session = login(&app, &admin).await;

    let response = app
        .send(
            session.apply(app.build(Method::DELETE, &format!("/admin/users/{}", admin.id))),
            Body::empty(),
        )
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}
