//! User-facing texts and keyboards.
//!
//! Everything is plain text (no parse mode) so user-supplied names never
//! need escaping.

use indoc::{formatdoc, indoc};
use itertools::Itertools;

use crate::core::plan::{format_price, PlanCatalog, PlanLimits, PlanType};
use crate::core::types::{Button, Keyboard};
use crate::flow::SKIP_IMAGE_ACTION;
use crate::session::FlowStep;
use crate::storage::{HubStats, Order, OrderStatus, Payment, Product, Store};
use crate::supervisor::TenantStatus;

/// Callback that leaves any flow and shows the main menu.
pub const CANCEL_ACTION: &str = "cancel_flow";
pub const BACK_MAIN_ACTION: &str = "back_main";

pub const GENERIC_FAILURE: &str = "Something went wrong on our side. Please try again in a moment.";
pub const FLOW_CANCELLED: &str = "Cancelled. Nothing was saved.";
pub const SESSION_RESET: &str = "Your previous conversation could not be restored, so it was reset.";
pub const SELECTION_EXPIRED: &str = "That button has expired. Please start again from the menu.";
pub const NOT_ADMIN: &str = "This command is only available to administrators.";
pub const STORE_UNAVAILABLE: &str = "This store is currently unavailable. Please check back later.";
pub const COMMAND_IN_FLOW: &str = "Please answer the question above first, or send /cancel to stop.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

/// What the payment prompt tells the user to transfer to.
#[derive(Debug, Clone)]
pub struct PaymentDetails {
    pub card_number: String,
    pub card_holder: String,
    pub catalog: PlanCatalog,
}

fn cancel_keyboard() -> Keyboard {
    Keyboard::single("✖️ Cancel", CANCEL_ACTION)
}

fn back_keyboard() -> Keyboard {
    Keyboard::single("⬅️ Main menu", BACK_MAIN_ACTION)
}

// ==================== Mother bot ====================

pub fn main_menu(first_name: &str, has_store: bool, is_admin: bool) -> Reply {
    let text = formatdoc! {"
        👋 Hi {first_name}!

        StoreHub lets you open your own Telegram shop in a few minutes:
        register a store, link a bot from @BotFather and start selling.
    "};
    let store_row = if has_store {
        vec![Button::callback("🏪 My store", "manage_store")]
    } else {
        vec![Button::callback("🆕 Register a store", "register_store")]
    };
    let mut keyboard = Keyboard::new()
        .row(store_row)
        .row(vec![
            Button::callback("💎 Plans", "view_plans"),
            Button::callback("❓ Help", "support"),
        ]);
    if is_admin {
        keyboard = keyboard.row(vec![Button::callback("🛠 Admin", "admin_panel")]);
    }
    Reply::text(text).with_keyboard(keyboard)
}

pub fn help() -> Reply {
    Reply::text(indoc! {"
        Commands:
        /start - main menu
        /register - register a new store
        /plans - plans and prices
        /panel - manage your store
        /addproduct - add a product
        /orders - orders of your store
        /renew - renew or upgrade your plan
        /token - link your store bot
        /cancel - leave the current step
    "})
    .with_keyboard(back_keyboard())
}

fn plan_line(limits: &PlanLimits) -> String {
    let products = limits
        .product_limit
        .map_or_else(|| "unlimited products".to_string(), |n| format!("up to {} products", n));
    let price = if limits.price == 0 {
        "free".to_string()
    } else {
        format!("{} per month", format_price(limits.price))
    };
    format!(
        "• {}: {}, {}, {}% commission",
        limits.plan.as_ref().to_uppercase(),
        price,
        products,
        limits.commission_percent
    )
}

pub fn plans(catalog: &PlanCatalog, has_store: bool) -> Reply {
    let lines = [PlanType::Free, PlanType::Pro, PlanType::Vip]
        .iter()
        .map(|plan| plan_line(&catalog.limits(*plan)))
        .join("\n");
    let next = if has_store {
        Button::callback("💎 Renew / upgrade", RENEW_ACTION)
    } else {
        Button::callback("🆕 Register a store", "register_store")
    };
    Reply::text(format!("💎 Plans\n\n{}", lines)).with_keyboard(
        Keyboard::new()
            .row(vec![next])
            .row(vec![Button::callback("⬅️ Main menu", BACK_MAIN_ACTION)]),
    )
}

/// Opens the renewal menu of the owner's existing store.
pub const RENEW_ACTION: &str = "renew_plan";

fn renew_keyboard() -> Keyboard {
    Keyboard::single("💎 Renew / upgrade", RENEW_ACTION)
}

/// Paid plans an existing store can pay for, current one marked.
pub fn renew_menu(store: &Store, catalog: &PlanCatalog) -> Reply {
    let expires = store
        .expires_at
        .map_or_else(|| "not active yet".to_string(), |at| at.format("%Y-%m-%d").to_string());
    let lines = [PlanType::Pro, PlanType::Vip]
        .iter()
        .map(|plan| plan_line(&catalog.limits(*plan)))
        .join("\n");
    let text = formatdoc! {"
        💎 Renew or upgrade \"{name}\"
        Current plan: {plan} ({status}, valid until {expires})

        {lines}

        Time left on an active plan is kept.",
        name = store.name,
        plan = store.plan.as_ref().to_uppercase(),
        status = if store.is_active { "active" } else { "inactive" },
    };
    let buttons = [PlanType::Pro, PlanType::Vip]
        .iter()
        .map(|plan| Button::callback(plan.as_ref().to_uppercase(), plan.renewal_action()))
        .collect();
    Reply::text(text).with_keyboard(
        Keyboard::new()
            .row(buttons)
            .row(vec![Button::callback("⬅️ Back", "manage_store")]),
    )
}

fn plan_keyboard() -> Keyboard {
    Keyboard::new()
        .row(vec![
            Button::callback("Free", PlanType::Free.action()),
            Button::callback("Pro", PlanType::Pro.action()),
            Button::callback("VIP", PlanType::Vip.action()),
        ])
        .row(vec![Button::callback("✖️ Cancel", CANCEL_ACTION)])
}

pub fn join_channel(channel: &str) -> Reply {
    let handle = channel.trim_start_matches('@');
    let mut keyboard = Keyboard::new();
    if handle.parse::<i64>().is_err() {
        keyboard = keyboard.row(vec![Button::url("📢 Join channel", format!("https://t.me/{}", handle))]);
    }
    keyboard = keyboard.row(vec![Button::callback("✅ I joined", "check_membership")]);
    Reply::text(format!(
        "To use this bot, please join our channel @{} first, then tap \"I joined\".",
        handle
    ))
    .with_keyboard(keyboard)
}

pub fn store_panel(store: &Store, product_count: u32) -> Reply {
    let limit = store
        .product_limit
        .map_or_else(|| "unlimited".to_string(), |n| n.to_string());
    let expires = store
        .expires_at
        .map_or_else(|| "never".to_string(), |at| at.format("%Y-%m-%d").to_string());
    let bot_status = if store.bot_enabled {
        store.bot_status.to_string()
    } else {
        "switched off".to_string()
    };
    let bot = match (&store.bot_username, store.has_bot()) {
        (Some(username), _) => format!("@{} ({})", username, bot_status),
        (None, true) => format!("linked ({})", bot_status),
        (None, false) => "not linked".to_string(),
    };
    let mut text = formatdoc! {"
        🏪 {name}
        Plan: {plan}
        Status: {status}
        Products: {product_count} / {limit}
        Expires: {expires}
        Bot: {bot}",
        name = store.name,
        plan = store.plan.as_ref().to_uppercase(),
        status = if store.is_active { "active" } else { "inactive" },
    };
    if let Some(error) = &store.bot_error {
        text.push_str(&format!("\nLast bot error: {}", error));
    }

    let mut keyboard = Keyboard::new()
        .row(vec![
            Button::callback("➕ Add product", "add_product"),
            Button::callback("📦 Products", "list_products"),
        ])
        .row(vec![
            Button::callback("🧾 Orders", "view_orders"),
            Button::callback("💎 Renew / upgrade", RENEW_ACTION),
        ]);
    keyboard = keyboard.row(vec![Button::callback("🔑 Link bot", "link_bot")]);
    if store.has_bot() {
        keyboard = keyboard.row(vec![
            Button::callback("▶️ Start", "bot_start"),
            Button::callback("⏹ Stop", "bot_stop"),
            Button::callback("🔄 Restart", "bot_restart"),
        ]);
    }
    Reply::text(text).with_keyboard(keyboard.row(vec![Button::callback("⬅️ Main menu", BACK_MAIN_ACTION)]))
}

pub fn owner_products(products: &[Product]) -> Reply {
    let text = if products.is_empty() {
        "Your store has no products yet.".to_string()
    } else {
        products
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. {} - {}", i + 1, p.name, format_price(p.price)))
            .join("\n")
    };
    Reply::text(text).with_keyboard(Keyboard::single("⬅️ Back", "manage_store"))
}

pub fn store_created(store: &Store) -> Reply {
    Reply::text(format!("✅ Store \"{}\" was created.", store.name))
}

pub fn already_owns_store(store: &Store) -> Reply {
    Reply::text(format!(
        "You already have a store: \"{}\". Only one store per account is allowed.",
        store.name
    ))
    .with_keyboard(Keyboard::single("🏪 My store", "manage_store"))
}

pub const NO_STORE: &str = "You don't have a store yet. Register one with /register.";
pub const STORE_INACTIVE: &str = "Your store is not active. It becomes active once a plan payment is confirmed.";

pub fn store_inactive() -> Reply {
    Reply::text(STORE_INACTIVE).with_keyboard(renew_keyboard())
}

pub fn product_limit_reached(limit: u32) -> Reply {
    Reply::text(format!(
        "Your plan allows {} products and that limit is reached. Upgrade your plan to add more.",
        limit
    ))
    .with_keyboard(Keyboard::single("💎 Plans", "view_plans"))
}

pub fn product_added(product: &Product) -> Reply {
    Reply::text(format!(
        "✅ Product \"{}\" added for {}.",
        product.name,
        format_price(product.price)
    ))
    .with_keyboard(
        Keyboard::new().row(vec![
            Button::callback("➕ Add another", "add_product"),
            Button::callback("🏪 My store", "manage_store"),
        ]),
    )
}

pub fn bot_linked(store: &Store) -> Reply {
    let note = if store.is_active {
        "Starting your bot now."
    } else {
        "It will start as soon as your store is active."
    };
    Reply::text(format!("✅ Bot token saved. {}", note))
}

/// Sent once a store exists but has no bot yet.
pub fn link_bot_hint() -> Reply {
    Reply::text(indoc! {"
        Next, create a bot with @BotFather and link it with /token.
        Your customers will shop through that bot."})
    .with_keyboard(Keyboard::single("🤖 Link bot", "link_bot"))
}

pub const PAYMENT_SUBMITTED: &str = "📨 Thanks! Your receipt was sent for review. You will be notified once it is checked.";
pub const PAYMENT_DUPLICATE: &str = "This receipt was already submitted and is waiting for review.";

pub fn payment_for_review(payment: &Payment, store: &Store, payer: &str) -> Reply {
    Reply::text(formatdoc! {"
        💳 Payment #{id}
        Store: {store} (#{store_id})
        From: {payer}
        Plan: {plan}
        Amount: {amount}",
        id = payment.id,
        store = store.name,
        store_id = store.id,
        plan = payment.plan.as_ref().to_uppercase(),
        amount = format_price(payment.amount),
    })
    .with_keyboard(Keyboard::new().row(vec![
        Button::callback("✅ Approve", format!("approve_payment_{}", payment.id)),
        Button::callback("❌ Reject", format!("reject_payment_{}", payment.id)),
    ]))
}

pub fn payment_approved(store: &Store) -> Reply {
    let expires = store
        .expires_at
        .map_or_else(|| "-".to_string(), |at| at.format("%Y-%m-%d").to_string());
    Reply::text(format!(
        "🎉 Your payment was approved. \"{}\" is active until {}.",
        store.name, expires
    ))
}

pub fn payment_rejected() -> Reply {
    Reply::text("Your payment could not be confirmed. Please contact support if you think this is a mistake.")
        .with_keyboard(renew_keyboard())
}

pub fn payment_decided(payment_id: i64, approved: bool) -> Reply {
    Reply::text(format!(
        "Payment #{} {}.",
        payment_id,
        if approved { "approved" } else { "rejected" }
    ))
}

pub const PAYMENT_ALREADY_DECIDED: &str = "That payment was already decided.";

pub fn store_expired(store: &Store) -> Reply {
    Reply::text(format!(
        "⏰ The plan of \"{}\" has expired and the store bot was stopped. Renew it to reopen the store.",
        store.name
    ))
    .with_keyboard(renew_keyboard())
}

pub fn expiry_reminder(store: &Store, days: i64) -> Reply {
    let when = if days <= 1 {
        "within a day".to_string()
    } else {
        format!("within {} days", days)
    };
    Reply::text(format!(
        "⏳ The plan of \"{}\" ends {}. Renew now to keep your store open.",
        store.name, when
    ))
    .with_keyboard(renew_keyboard())
}

pub fn tenant_failed(reason: &str) -> Reply {
    Reply::text(format!(
        "⚠️ Your store bot could not run: {}\nCheck the token with /token or try /panel later.",
        reason
    ))
}

pub fn tenant_action(action: &str, store_id: i64, result: Result<TenantStatus, String>) -> Reply {
    match result {
        Ok(status) => Reply::text(format!("Store #{}: {} done, bot is {}.", store_id, action, status)),
        Err(reason) => Reply::text(format!("Store #{}: {} failed: {}", store_id, action, reason)),
    }
}

pub fn admin_panel(stats: &HubStats, tenants: &[(i64, TenantStatus)]) -> Reply {
    let running = tenants.iter().filter(|(_, s)| *s == TenantStatus::Running).count();
    let failed = tenants.iter().filter(|(_, s)| *s == TenantStatus::Error).count();
    Reply::text(formatdoc! {"
        🛠 Admin panel
        Users: {users}
        Stores: {stores} ({active_stores} active)
        Products: {products}
        Orders: {orders}
        Pending payments: {pending_payments}
        Bots running: {running}, failed: {failed}

        /status - bot status per store
        /startbot <id>, /stopbot <id>, /restartbot <id>",
        users = stats.users,
        stores = stats.stores,
        active_stores = stats.active_stores,
        products = stats.products,
        orders = stats.orders,
        pending_payments = stats.pending_payments,
    })
}

pub fn tenant_status(stores: &[Store], live: &[(i64, TenantStatus)]) -> Reply {
    if stores.is_empty() {
        return Reply::text("No stores yet.");
    }
    let lines = stores
        .iter()
        .map(|store| {
            let status = live
                .iter()
                .find(|(id, _)| *id == store.id)
                .map_or(TenantStatus::Stopped, |(_, s)| *s);
            format!(
                "#{} {} [{}] bot: {}",
                store.id,
                store.name,
                if store.is_active { "active" } else { "inactive" },
                status
            )
        })
        .join("\n");
    Reply::text(lines)
}

pub const USAGE_TENANT_COMMAND: &str = "Usage: /startbot <store id>";

// ==================== Flow prompts ====================

/// The question asked at a flow step.
pub fn step_prompt(step: &FlowStep, payment: &PaymentDetails) -> Reply {
    let text = match step {
        FlowStep::RegistrationAwaitingName => "What is the name of your store? (3-50 characters)".to_string(),
        FlowStep::RegistrationAwaitingDescription { name } => {
            format!("Describe \"{}\" in a few words (10-200 characters).", name)
        }
        FlowStep::RegistrationAwaitingPlan { .. } => {
            let lines = [PlanType::Free, PlanType::Pro, PlanType::Vip]
                .iter()
                .map(|plan| plan_line(&payment.catalog.limits(*plan)))
                .join("\n");
            return Reply::text(format!("Choose a plan:\n\n{}", lines)).with_keyboard(plan_keyboard());
        }
        FlowStep::PaymentAwaitingProof { plan, .. } => formatdoc! {"
            To activate the {plan} plan, transfer {amount} to:
            {card}
            {holder}

            Then send a photo of the receipt here.",
            plan = plan.as_ref().to_uppercase(),
            amount = format_price(payment.catalog.limits(*plan).price),
            card = payment.card_number,
            holder = payment.card_holder,
        },
        FlowStep::ProductAwaitingName { .. } => "Product name? (2-100 characters)".to_string(),
        FlowStep::ProductAwaitingDescription { name, .. } => format!("Describe \"{}\" (5-1000 characters).", name),
        FlowStep::ProductAwaitingPrice { .. } => "Price? Whole number, e.g. 25000".to_string(),
        FlowStep::ProductAwaitingImage { .. } => {
            return Reply::text("Send a photo of the product, or skip.").with_keyboard(
                Keyboard::new()
                    .row(vec![Button::callback("⏭ Skip", SKIP_IMAGE_ACTION)])
                    .row(vec![Button::callback("✖️ Cancel", CANCEL_ACTION)]),
            );
        }
        FlowStep::BotLinkAwaitingToken { .. } => indoc! {"
            Create a bot with @BotFather and send its token here.
            It looks like 123456789:ABCdefGhIJKlmNoPQRstuVWXyz0123456789."}
        .to_string(),
        FlowStep::CheckoutAwaitingPhone { .. } | FlowStep::CheckoutAwaitingAddress { .. } => {
            return checkout_prompt(step).unwrap_or_else(|| Reply::text(GENERIC_FAILURE));
        }
    };
    Reply::text(text).with_keyboard(cancel_keyboard())
}

/// Prompts of the storefront checkout; `None` for any other step.
pub fn checkout_prompt(step: &FlowStep) -> Option<Reply> {
    let text = match step {
        FlowStep::CheckoutAwaitingPhone { .. } => "Your phone number, please (e.g. +447700900123).",
        FlowStep::CheckoutAwaitingAddress { .. } => "Delivery address? (10-300 characters)",
        _ => return None,
    };
    Some(Reply::text(text).with_keyboard(cancel_keyboard()))
}

// ==================== Storefront ====================

pub fn storefront_welcome(store: &Store) -> Reply {
    let text = store
        .welcome_message
        .clone()
        .unwrap_or_else(|| format!("Welcome to {}!\n\n{}", store.name, store.description));
    Reply::text(text).with_keyboard(
        Keyboard::new()
            .row(vec![Button::callback("🛍 Products", "show_products")])
            .row(vec![
                Button::callback("📦 My orders", "my_orders"),
                Button::callback("☎️ Contact", "contact"),
            ]),
    )
}

pub fn catalog(products: &[Product]) -> Reply {
    if products.is_empty() {
        return Reply::text("No products are available right now.");
    }
    let keyboard = products.iter().fold(Keyboard::new(), |kb, p| {
        kb.row(vec![Button::callback(
            format!("{} - {}", p.name, format_price(p.price)),
            format!("buy_{}", p.id),
        )])
    });
    Reply::text("🛍 Our products:").with_keyboard(keyboard)
}

/// Caption and buttons for a product's detail card.
pub fn product_detail(product: &Product) -> Reply {
    Reply::text(format!(
        "{}\n\n{}\n\nPrice: {}",
        product.name,
        product.description,
        format_price(product.price)
    ))
    .with_keyboard(Keyboard::new().row(vec![
        Button::callback("✅ Buy", format!("confirm_buy_{}", product.id)),
        Button::callback("✖️ Cancel", "cancel_buy"),
    ]))
}

pub const PRODUCT_GONE: &str = "This product is no longer available.";

pub fn order_placed(order: &Order, product: &Product) -> Reply {
    Reply::text(format!(
        "✅ Order #{} for \"{}\" was placed. The seller will contact you at {}.",
        order.id, product.name, order.phone
    ))
}

pub fn new_order_for_owner(order: &Order, product: &Product) -> Reply {
    Reply::text(formatdoc! {"
        🛒 New order #{id}
        Product: {product}
        Amount: {amount}
        Customer: {customer}
        Phone: {phone}
        Address: {address}",
        id = order.id,
        product = product.name,
        amount = format_price(order.amount),
        customer = order.customer_name,
        phone = order.phone,
        address = order.address,
    })
}

pub const ORDER_NOT_PENDING: &str = "That order was already handled or does not belong to your store.";

/// The owner's view of recent orders; pending ones get a confirm button.
pub fn store_orders(orders: &[Order]) -> Reply {
    let back = Button::callback("⬅️ Back", "manage_store");
    if orders.is_empty() {
        return Reply::text("Your store has no orders yet.").with_keyboard(Keyboard::new().row(vec![back]));
    }
    let lines = orders
        .iter()
        .map(|o| {
            format!(
                "#{} {} - {} ({})\n   {}, {}",
                o.id,
                o.created_at.format("%Y-%m-%d %H:%M"),
                format_price(o.amount),
                o.status,
                o.customer_name,
                o.phone
            )
        })
        .join("\n");
    let keyboard = orders
        .iter()
        .filter(|o| o.status == OrderStatus::Pending)
        .fold(Keyboard::new(), |kb, o| {
            kb.row(vec![Button::callback(
                format!("✅ Confirm #{}", o.id),
                format!("confirm_order_{}", o.id),
            )])
        })
        .row(vec![back]);
    Reply::text(format!("🧾 Recent orders:\n{}", lines)).with_keyboard(keyboard)
}

pub fn order_confirmed(order: &Order, customer_notified: bool) -> Reply {
    let note = if customer_notified {
        "The customer was notified."
    } else {
        "The store bot is not running, so the customer was not notified."
    };
    Reply::text(format!("✅ Order #{} confirmed. {}", order.id, note))
        .with_keyboard(Keyboard::single("🧾 Orders", "view_orders"))
}

pub fn order_confirmed_for_customer(order: &Order, store: &Store) -> Reply {
    Reply::text(format!(
        "✅ {} confirmed your order #{}. They will contact you soon.",
        store.name, order.id
    ))
}

pub fn customer_orders(orders: &[Order]) -> Reply {
    if orders.is_empty() {
        return Reply::text("You have no orders yet.");
    }
    let lines = orders
        .iter()
        .map(|o| {
            format!(
                "#{} {} - {} ({})",
                o.id,
                o.created_at.format("%Y-%m-%d"),
                format_price(o.amount),
                o.status
            )
        })
        .join("\n");
    Reply::text(format!("📦 Your orders:\n{}", lines))
}

pub fn contact(store: &Store) -> Reply {
    Reply::text(format!(
        "To reach {}, reply here and the seller will get back to you.",
        store.name
    ))
}
