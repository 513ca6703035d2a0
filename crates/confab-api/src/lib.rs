pub mod history;
pub mod unread;

use std::sync::Arc;

use confab_db::Database;
use confab_gateway::dispatcher::Dispatcher;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
}
