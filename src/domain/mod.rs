//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    AppError, ConfigError, DatabaseError, ExternalServiceError, GatewayError, ValidationError,
};
pub use traits::{
    Database, Mailer, NewAuditLog, NewPayment, NewSol, NewUser, PaymentGateway, ReceiptStore,
};
pub use types::{
    AuditLog, CheckoutSession, CreatePaymentRequest, CreateSolRequest, ErrorDetail, ErrorResponse,
    HealthResponse, HealthStatus, LoginRequest, PaginatedResponse, PaginationParams,
    ParticipantInfo, Participation, Payment, PaymentMethod, PaymentResponse, PaymentStatus,
    RateLimitResponse, RegisterRequest, RejectPaymentRequest, Role, Sol, SolFrequency, SolStatus,
    TokenResponse, TourOutcome, Transfer, TransferStatus, User, UserProfile, WebhookEvent,
};
