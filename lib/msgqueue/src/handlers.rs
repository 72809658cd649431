// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use num_traits::FromPrimitive;

use crate::{BuiltinCode, RegistryError, Request, Response};

/// Something that can service a host request.
///
/// The handler fills in `response` (which starts zeroed) and returns an
/// exit code, which is ORed into the status byte of the response.
pub trait RequestHandler: Sync {
    fn handle(&self, code: u8, request: &Request, response: &mut Response)
        -> u8;
}

impl<F> RequestHandler for F
where
    F: Fn(u8, &Request, &mut Response) -> u8 + Sync,
{
    fn handle(
        &self,
        code: u8,
        request: &Request,
        response: &mut Response,
    ) -> u8 {
        self(code, request, response)
    }
}

/// One entry of the list a [`HandlerTable`] is built from.
#[derive(Copy, Clone)]
pub struct Registration<'a> {
    pub code: u8,
    pub handler: &'a dyn RequestHandler,
}

/// Request code to handler map.  Built once at startup, then read-only.
pub struct HandlerTable<'a> {
    handlers: [Option<&'a dyn RequestHandler>; 256],
}

impl<'a> HandlerTable<'a> {
    pub const fn empty() -> Self {
        Self {
            handlers: [None; 256],
        }
    }

    pub fn from_registrations(
        registrations: &[Registration<'a>],
    ) -> Result<Self, RegistryError> {
        let mut table = Self::empty();

        for r in registrations {
            if BuiltinCode::from_u8(r.code).is_some() {
                return Err(RegistryError::Reserved(r.code));
            }

            let slot = &mut table.handlers[usize::from(r.code)];
            if slot.is_some() {
                return Err(RegistryError::Duplicate(r.code));
            }
            *slot = Some(r.handler);
        }

        Ok(table)
    }

    pub fn get(&self, code: u8) -> Option<&'a dyn RequestHandler> {
        self.handlers[usize::from(code)]
    }
}
