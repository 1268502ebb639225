//! Authentication for the request/response surface and the ticket
//! handshake that bridges it to the real-time channel.

pub mod claims;
pub mod middleware;
pub mod rate_limit;
pub mod ticket;

pub use claims::{UserClaims, UserContext};
pub use ticket::{IssuedTicket, TicketService};
