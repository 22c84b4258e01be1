// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

#[cfg(not(any(feature = "stub", feature = "chaos")))]
compile_error! {"must set the stub or chaos feature"}

#[cfg(feature = "chaos")]
pub mod chaos;
#[cfg(feature = "stub")]
pub mod stub;

cfg_if::cfg_if! {
    if #[cfg(feature = "stub")] {
        /// The backend used when the caller doesn't ask for a specific one
        pub type DefaultDal = stub::StubDal;
    } else {
        /// The backend used when the caller doesn't ask for a specific one
        pub type DefaultDal = chaos::ChaosDal;
    }
}

/// Issues the opaque tokens handed back to the pipeline manager.  Token 0 is
/// never issued.
#[derive(Debug, Default)]
pub(crate) struct TokenSource(std::sync::atomic::AtomicU64);

impl TokenSource {
    pub fn next(&self) -> dal::DalHdl {
        self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1
    }
}
