pub mod error;
pub mod memory;
pub mod postgrest;
pub mod repository;
pub mod supabase;

pub use error::StoreError;
pub use memory::InMemoryDatabase;
pub use postgrest::PostgrestStore;
pub use repository::{
    AppointmentRepository, PaymentRepository, ProfileRepository, Repositories, ScheduleRepository,
};
