//! Common test utilities
//!
//! Shared by every integration test: a throwaway database, seeded stores and
//! a fully wired hub whose bots talk to in-process doubles.
#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use storehub::core::plan::{PlanCatalog, PlanType};
use storehub::core::types::{InboundEvent, Sender, StoreId, TextMessage};
use storehub::dispatch::{deliver, LaneLimits};
use storehub::router::mother::MotherSettings;
use storehub::router::{MotherHandler, Routed, Router, StorefrontHandler};
use storehub::session::{BotScope, FlowStep, SessionKey, SessionStore};
use storehub::storage::{Database, NewProduct, NewStore, Product, ProductCreation, Store, StoreCreation};
use storehub::supervisor::{RouterFactory, Supervisor, TenantHandle};
use storehub::telegram::messages::PaymentDetails;
use storehub::testing::{MockConnector, RecordingOutbound};

pub const ADMIN: i64 = 900;
pub const OWNER: i64 = 100;
pub const CUSTOMER: i64 = 500;

/// Well-formed bot tokens; the mock connector decides whether they work.
pub const TOKEN_A: &str = "1111111:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
pub const TOKEN_B: &str = "2222222:BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB";
pub const TOKEN_C: &str = "3333333:CCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCC";

pub fn open_db() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("storehub.sqlite");
    let db = Database::open(path.to_str().unwrap()).unwrap();
    (dir, db)
}

/// Creates a store for `owner`, optionally active and with a linked bot.
pub fn seed_store(db: &Database, owner: i64, plan: PlanType, active: bool, token: Option<&str>) -> Store {
    let created = db
        .create_store(&NewStore {
            owner_id: owner,
            name: "Test Shop",
            description: "Everything a test could want",
            limits: PlanCatalog::default().limits(plan),
            active,
            now: Utc::now(),
        })
        .unwrap();
    let StoreCreation::Created(store) = created else {
        panic!("owner {} already has a store", owner);
    };
    if let Some(token) = token {
        db.set_bot_token(store.id, token).unwrap();
    }
    db.store(store.id).unwrap().unwrap()
}

pub fn seed_product(db: &Database, store_id: StoreId, name: &str, price: i64) -> Product {
    match db
        .create_product(&NewProduct {
            store_id,
            name,
            description: "A fine product",
            price,
            image_file_id: None,
        })
        .unwrap()
    {
        ProductCreation::Created(product) => product,
        other => panic!("product not created: {:?}", other),
    }
}

/// A text message with a sender that has a first name and username.
pub fn named_text(user_id: i64, username: &str, text: &str) -> InboundEvent {
    InboundEvent::Text(TextMessage {
        chat_id: user_id,
        sender: Sender {
            user_id,
            username: Some(username.to_string()),
            first_name: username.to_string(),
        },
        text: Some(text.to_string()),
        attachments: Vec::new(),
    })
}

/// Polls `check` every 10ms until it holds or two seconds pass.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}

/// A mother bot router plus supervisor wired the way `main` wires them,
/// with the transport replaced by doubles.
pub struct Hub {
    pub _dir: TempDir,
    pub db: Database,
    pub sessions: SessionStore,
    pub connector: Arc<MockConnector>,
    /// What the mother bot sent
    pub mother_out: Arc<RecordingOutbound>,
    /// What every tenant bot sent
    pub tenant_out: Arc<RecordingOutbound>,
    pub supervisor: Supervisor,
    pub mother: Router,
}

impl Hub {
    pub fn new() -> Self {
        Self::with_connector(MockConnector::new())
    }

    pub fn with_connector(connector: MockConnector) -> Self {
        let (dir, db) = open_db();
        let sessions = SessionStore::in_memory(Duration::from_secs(3_600));
        let connector = Arc::new(connector);
        let tenant_out = connector.outbound();
        let mother_out = Arc::new(RecordingOutbound::new());

        let routers: RouterFactory = {
            let db = db.clone();
            let sessions = sessions.clone();
            Arc::new(move |tenant: &TenantHandle| {
                Router::new(
                    Arc::new(StorefrontHandler::new(db.clone(), tenant.store_id)),
                    sessions.clone(),
                )
            })
        };
        let supervisor = Supervisor::new(
            connector.clone(),
            Arc::new(db.clone()),
            routers,
            mother_out.clone(),
            LaneLimits { workers: 4, pending: 64 },
        );

        let settings = MotherSettings {
            admins: vec![ADMIN],
            payment: PaymentDetails {
                card_number: "6037-0000-0000-0000".to_string(),
                card_holder: "Store Hub".to_string(),
                catalog: PlanCatalog::default(),
            },
        };
        let handler = MotherHandler::new(db.clone(), supervisor.clone(), settings);
        let mother = Router::new(Arc::new(handler), sessions.clone());

        Self {
            _dir: dir,
            db,
            sessions,
            connector,
            mother_out,
            tenant_out,
            supervisor,
            mother,
        }
    }

    /// Routes an event through the mother bot and delivers the replies.
    pub async fn send(&self, event: InboundEvent) -> Routed {
        let routed = self.mother.route(&event).await;
        deliver(self.mother_out.as_ref(), &routed.effects).await;
        routed
    }

    pub async fn session(&self, user_id: i64) -> Option<FlowStep> {
        self.sessions
            .get(&SessionKey::new(BotScope::Mother, user_id))
            .await
            .unwrap()
            .map(|s| s.step)
    }

    /// Feeds an event to a running tenant bot's update source.
    pub fn feed(&self, token: &str, event: InboundEvent) {
        self.connector
            .feed(token)
            .expect("tenant bot was never opened")
            .send(Ok(event))
            .expect("tenant update source is closed");
    }

    pub async fn mother_texts(&self, chat_id: i64) -> Vec<String> {
        self.mother_out.texts_to(chat_id).await
    }

    pub async fn last_mother_text(&self, chat_id: i64) -> String {
        self.mother_texts(chat_id).await.pop().unwrap_or_default()
    }
}
