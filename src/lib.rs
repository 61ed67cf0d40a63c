// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! # ℙurplecoin Evolution
//! The Evolution subsystem of the node: deterministic service node lists
//! derived from provider registrations, on-chain user accounts funded by
//! burnt credits, and off-chain transitions batched into blocks.
//!
//! ## Components
//! * **Provider registrations**: a `ProRegTx` special transaction binds a
//!   collateralized stake to a service node identity (network endpoint,
//!   operator and owner keys, payout script). Every peer derives the exact
//!   same node list from the chain at every height; addresses and keys are
//!   unique across the list.
//! * **User accounts**: `SubTx` envelopes carried in `OP_SUBSCRIPTION`
//!   outputs create, top up, rekey and close accounts. The output value is
//!   burnt and credited to the account; credits are spendable only as
//!   transition fees.
//! * **Transitions**: lightweight off-chain state updates, chained per user
//!   through the previous transition's hash, signed with the user's current
//!   key and mined in batches. Every forward step of the validator has a
//!   matching undo, so deep reorgs replay bit-exactly.
//! * **Transition mempool**: pools loose transitions, reconstructs per-user
//!   chains, re-absorbs reorged-out transitions and parks the ones that
//!   only fail because some of their ancestry has not been seen yet.
//!
//! Block-level entry points live on [`evo::EvoContext`]; all of them expect
//! the caller to hold the chain-state lock and to call connect/disconnect
//! strictly in chain order.

#![allow(dead_code, unused)]

pub mod chain;
pub mod codec;
pub mod consensus;
pub mod evo;
pub mod node;
pub mod primitives;
pub mod settings;
