use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use cart_session::{
    Cart, CartSession, DurableStore, Event, EventSender, LAST_UPDATE_KEY, SqliteStore,
    StoreConfig, TOKEN_KEY, VariationAttribute,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Parser)]
#[command(name = "cart-session", version)]
#[command(about = "Inspect and edit a WooCommerce Store API cart", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Store API base URL (e.g. https://shop.example/wp-json/wc/store/v1)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// SQLite file holding the cart token
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current cart
    Show,

    /// Add a product to the cart
    Add {
        /// Product or variation ID
        product_id: u64,

        /// Quantity to add
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,

        /// Variation attributes as JSON, e.g. '[{"attribute":"Color","value":"Blue"}]'
        #[arg(long)]
        variation: Option<String>,
    },

    /// Change the quantity of a cart item
    Update {
        /// Cart item key
        key: String,

        /// New quantity
        quantity: u32,
    },

    /// Remove an item from the cart
    Remove {
        /// Cart item key
        key: String,
    },

    /// Apply or remove a coupon
    Coupon {
        #[command(subcommand)]
        action: CouponAction,
    },

    /// Update customer addresses from a JSON file
    Customer {
        /// JSON file with billing_address and/or shipping_address
        file: PathBuf,
    },

    /// Place the order using a JSON checkout payload
    Checkout {
        /// JSON file with the checkout payload
        file: PathBuf,
    },

    /// Print the stored cart token
    Token,

    /// Discard the stored cart token and start a fresh cart next time
    Forget,

    /// Refresh and print the cart whenever another process changes it
    Watch,
}

#[derive(Subcommand)]
enum CouponAction {
    /// Apply a coupon code
    Apply { code: String },
    /// Remove a coupon code
    Remove { code: String },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive("info".parse().expect("valid log directive"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_json(path: &Path) -> Result<Value> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn open_store(config: &StoreConfig) -> Result<Arc<SqliteStore>> {
    let store = match config.storage_path {
        Some(ref path) => SqliteStore::new(path),
        None => SqliteStore::default_location(),
    }
    .context("failed to open cart storage")?;
    Ok(Arc::new(store))
}

fn print_cart(cart: &Cart) {
    if cart.is_empty() {
        println!("Cart is empty.");
    } else {
        println!("{:<34} {:>5}  NAME", "KEY", "QTY");
        println!("{}", "-".repeat(70));
        for item in cart.items() {
            let key = item.get("key").and_then(Value::as_str).unwrap_or("-");
            let quantity = item.get("quantity").and_then(Value::as_u64).unwrap_or(0);
            let name = item.get("name").and_then(Value::as_str).unwrap_or("");
            println!("{:<34} {:>5}  {}", key, quantity, name);
        }
    }

    let coupons = cart.coupons();
    if !coupons.is_empty() {
        println!("Coupons: {}", coupons.join(", "));
    }
    if let Some(total) = cart.totals().display_total() {
        println!("Total:   {}", total);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Precedence: CLI > env > project > global > defaults
    let mut config = StoreConfig::load().unwrap_or_else(|e| {
        debug!(error = %e, "failed to load config, using defaults");
        StoreConfig::default()
    });
    if let Some(url) = cli.base_url {
        config.base_url = Some(url);
    }
    if let Some(path) = cli.storage {
        config.storage_path = Some(path);
    }

    match cli.command {
        Commands::Token => {
            let store = open_store(&config)?;
            match store.get(TOKEN_KEY).await? {
                Some(token) => println!("{}", token),
                None => println!("No cart token stored."),
            }
            return Ok(());
        }
        Commands::Forget => {
            let store = open_store(&config)?;
            store.remove(TOKEN_KEY).await?;
            println!("Cart token discarded.");
            return Ok(());
        }
        _ => {}
    }

    let store = open_store(&config)?;
    let (events, mut event_rx) = EventSender::channel(EVENT_CHANNEL_CAPACITY);
    let session = CartSession::builder()
        .config(config.clone())
        .shared_store(Arc::clone(&store) as Arc<dyn DurableStore>)
        .events(events)
        .build()
        .context("failed to create cart session")?;
    let session = Arc::new(session);

    session
        .initialize()
        .await
        .context("failed to load cart")?;

    match cli.command {
        Commands::Show => {
            if let Some(cart) = session.cart() {
                print_cart(&cart);
            }
        }

        Commands::Add {
            product_id,
            quantity,
            variation,
        } => {
            let variation: Vec<VariationAttribute> = match variation {
                Some(ref json) => {
                    serde_json::from_str(json).context("invalid --variation JSON")?
                }
                None => Vec::new(),
            };
            let cart = session
                .add_item(product_id, quantity, variation)
                .await
                .context("failed to add item")?;
            println!("Added product {} x{}.", product_id, quantity);
            print_cart(&cart);
        }

        Commands::Update { key, quantity } => {
            let cart = session
                .update_item(&key, quantity)
                .await
                .context("failed to update item")?;
            print_cart(&cart);
        }

        Commands::Remove { key } => {
            let cart = session
                .remove_item(&key)
                .await
                .context("failed to remove item")?;
            print_cart(&cart);
        }

        Commands::Coupon { action } => {
            let cart = match action {
                CouponAction::Apply { code } => session
                    .apply_coupon(&code)
                    .await
                    .with_context(|| format!("failed to apply coupon {}", code))?,
                CouponAction::Remove { code } => session
                    .remove_coupon(&code)
                    .await
                    .with_context(|| format!("failed to remove coupon {}", code))?,
            };
            print_cart(&cart);
        }

        Commands::Customer { file } => {
            let customer = read_json(&file)?;
            let cart = session
                .update_customer(customer)
                .await
                .context("failed to update customer")?;
            print_cart(&cart);
        }

        Commands::Checkout { file } => {
            let payload = read_json(&file)?;
            let order = session
                .checkout(payload)
                .await
                .context("checkout failed")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&order).context("failed to format order")?
            );
        }

        Commands::Watch => {
            let poller = store.poll_changes(&[LAST_UPDATE_KEY], config.sync_poll_interval());
            let sync = session.spawn_sync();
            info!("watching for cart changes, press Ctrl-C to stop");

            if let Some(cart) = session.cart() {
                print_cart(&cart);
            }

            loop {
                tokio::select! {
                    event = event_rx.recv() => match event {
                        Some(Event::SyncRefreshed) => {
                            println!();
                            if let Some(cart) = session.cart() {
                                print_cart(&cart);
                            }
                        }
                        Some(Event::TokenDiscarded { status }) => {
                            println!("Cart token rejected ({}); starting a fresh cart.", status);
                        }
                        Some(_) => {}
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }

            sync.stop();
            poller.abort();
            session.dispose();
        }

        // Handled before the session was built
        Commands::Token | Commands::Forget => {}
    }

    Ok(())
}
