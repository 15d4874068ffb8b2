pub mod store;

use std::sync::Arc;

use mongodb::bson::doc;
use mongodb::options::IndexOptions;
use mongodb::{Client, Database, IndexModel};
use rocket::fairing::AdHoc;

use crate::models::{EVALUATIONS, POSTS, USERS};
use crate::services::RatingService;
use store::MongoRatingStore;

pub use store::{RatingStore, StoreError};

pub fn init() -> AdHoc {
    AdHoc::on_ignite("MongoDB", |rocket| async {
        match connect().await {
            Ok(database) => {
                info!("✓ MongoDB connected successfully");
                if let Err(e) = ensure_indexes(&database).await {
                    warn!("Failed to create indexes: {}", e);
                }
                let ratings = Arc::new(RatingService::new(Arc::new(
                    MongoRatingStore::new(database.clone()),
                )));
                rocket.manage(database).manage(ratings)
            }
            Err(e) => {
                error!("✗ Failed to connect to MongoDB: {}", e);
                rocket
            }
        }
    })
}

async fn connect() -> Result<Database, mongodb::error::Error> {
    let uri = crate::config::Config::mongodb_uri();
    let client = Client::with_uri_str(&uri).await?;

    // Test connection
    client
        .database("admin")
        .run_command(doc! {"ping": 1}, None)
        .await?;

    Ok(client.database(&crate::config::Config::database_name()))
}

async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    db.collection::<mongodb::bson::Document>(EVALUATIONS)
        .create_index(IndexModel::builder().keys(doc! { "postId": 1 }).build(), None)
        .await?;

    db.collection::<mongodb::bson::Document>(POSTS)
        .create_index(IndexModel::builder().keys(doc! { "createdAt": -1 }).build(), None)
        .await?;

    db.collection::<mongodb::bson::Document>(USERS)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "username": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
            None,
        )
        .await?;

    Ok(())
}

pub type DbConn = Database;
pub type Ratings = Arc<RatingService>;
