//! Order domain: status axes, lifecycle events and the transition table.

pub mod state;

pub use state::{
    OrderEvent, OrderStatus, OrderView, PaymentStatus, SideEffect, StateMachine, Transition,
    TransitionError, TransitionOutcome,
};
