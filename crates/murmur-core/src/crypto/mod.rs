//! Protocol-specific encryption: the signer capability, the decrypt pipeline for
//! both DM schemes, and construction of outgoing DMs.

pub mod decrypt;
pub mod signer;
pub mod wrap;

pub use decrypt::{DecryptError, GiftWrapIdSet, MessageDecryptor};
pub use signer::{Cipher, DmSigner, EventDraft, KeysSigner, SignerError};
pub use wrap::{build_nip04, build_rumor, gift_wrap, OutgoingGiftWrap, WrapError};
