#[macro_use]
extern crate rocket;

mod config;
mod db;
mod guards;
mod models;
mod routes;
mod services;
mod utils;

use std::time::Duration;

use dotenvy::dotenv;
use rocket::fairing::{AdHoc, Fairing, Info, Kind};
use rocket::http::Header;
use rocket::{Build, Request, Response, Rocket};
use rocket_okapi::openapi_get_routes;
use rocket_okapi::swagger_ui::{SwaggerUIConfig, make_swagger_ui};

use config::Config;
use db::{DbConn, Ratings};

/* ----------------------------- CORS ----------------------------- */

pub struct CORS;

#[rocket::async_trait]
impl Fairing for CORS {
    fn info(&self) -> Info {
        Info {
            name: "CORS",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        if let Some(origin) = request.headers().get_one("Origin") {
            response.set_header(Header::new("Access-Control-Allow-Origin", origin));
        }

        response.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "GET, POST, PUT, DELETE, OPTIONS",
        ));

        response.set_header(Header::new(
            "Access-Control-Allow-Headers",
            "Content-Type, Authorization",
        ));

        response.set_header(Header::new("Access-Control-Allow-Credentials", "true"));
    }
}

/* ----------------------------- OPTIONS ----------------------------- */

#[options("/<_..>")]
fn options_handler() {}

/* ----------------------------- ERRORS ----------------------------- */

#[catch(401)]
fn unauthorized() -> rocket::serde::json::Value {
    rocket::serde::json::json!({
        "success": false,
        "message": "Missing or invalid access token"
    })
}

#[catch(404)]
fn not_found() -> rocket::serde::json::Value {
    rocket::serde::json::json!({
        "success": false,
        "message": "Resource not found (check /api/v1 prefix)"
    })
}

#[catch(422)]
fn unprocessable() -> rocket::serde::json::Value {
    rocket::serde::json::json!({
        "success": false,
        "message": "Malformed request body"
    })
}

#[catch(500)]
fn internal_error() -> rocket::serde::json::Value {
    rocket::serde::json::json!({
        "success": false,
        "message": "Internal server error"
    })
}

/* ----------------------------- RATINGS ----------------------------- */

fn rating_jobs() -> AdHoc {
    AdHoc::on_liftoff("Rating jobs", |rocket| Box::pin(async move {
        let (Some(db), Some(ratings)) = (
            rocket.state::<DbConn>().cloned(),
            rocket.state::<Ratings>().cloned(),
        ) else {
            warn!("No database, rating jobs not started");
            return;
        };

        if Config::reconcile_on_startup() {
            let ratings = ratings.clone();
            tokio::spawn(async move {
                let _ = ratings.recompute_all().await;
            });
        }

        if Config::rating_watcher() {
            let retry = Duration::from_secs(Config::watcher_retry_secs());
            tokio::spawn(services::watcher::watch_evaluations(db, ratings, retry));
        }
    }))
}

/* ----------------------------- SWAGGER ----------------------------- */

fn swagger_config() -> SwaggerUIConfig {
    SwaggerUIConfig {
        url: "/api/v1/openapi.json".to_string(),
        ..Default::default()
    }
}

/* ----------------------------- LAUNCH ----------------------------- */

#[launch]
fn rocket() -> Rocket<Build> {
    dotenv().ok();
    env_logger::init();

    info!("🚀 taskLink API starting (development: {})", Config::is_development());
    info!("📚 Swagger UI → http://localhost:8000/api/docs");

    rocket::build()
        .attach(db::init())
        .attach(rating_jobs())
        .attach(CORS)
        .mount("/", routes![options_handler])
        .mount(
            "/api/v1",
            openapi_get_routes![
                // Auth
                routes::auth::register,
                routes::auth::login,
                routes::auth::refresh_token,
                // User
                routes::user::get_profile,
                routes::user::update_profile,
                // Posts
                routes::post::create_post,
                routes::post::list_posts,
                routes::post::get_post,
                routes::post::get_post_rating,
                routes::post::delete_post,
                // Evaluations
                routes::evaluation::create_evaluation,
                routes::evaluation::update_evaluation,
                routes::evaluation::delete_evaluation,
                routes::evaluation::get_post_evaluations,
                // Ratings
                routes::rating::recompute_ratings,
            ],
        )
        .mount("/api/docs", make_swagger_ui(&swagger_config()))
        .register("/", catchers![unauthorized, not_found, unprocessable, internal_error])
}
