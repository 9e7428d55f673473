mod account;
mod card;
mod ledger;
mod money;
mod pin_reset;
mod transaction;

pub use account::*;
pub use card::*;
pub use ledger::*;
pub use money::*;
pub use pin_reset::*;
pub use transaction::*;
