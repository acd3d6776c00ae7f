use std::sync::atomic::{AtomicU16, Ordering};

/// A 6-byte ascii name, either empty (the unnamed statement/portal) or
/// generated as `"q00001"`-style tokens from an atomic counter.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id([u8; 6]);

impl Id {
    pub const fn unnamed() -> Self {
        Self([0; 6])
    }

    fn next(prefix: u8, atomic: &AtomicU16) -> Self {
        let n = atomic.fetch_add(1, Ordering::Relaxed);
        let mut buf = [0u8; 6];
        buf[0] = prefix;
        let mut tmp = itoa::Buffer::new();
        let digits = tmp.format(n);
        let pad = 5 - digits.len();
        for (i, b) in digits.bytes().enumerate() {
            buf[1 + pad + i] = b;
        }
        for b in buf.iter_mut().skip(1).take(pad) {
            *b = b'0';
        }
        Self(buf)
    }

    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|b| *b == 0).unwrap_or(6);
        // SAFETY: only ascii digits and a fixed prefix byte are ever written.
        unsafe { std::str::from_utf8_unchecked(&self.0[..end]) }
    }

    pub fn is_unnamed(&self) -> bool {
        self.0[0] == 0
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! delegate {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Id);

        impl $name {
            pub const fn unnamed() -> Self {
                Self(Id::unnamed())
            }

            pub fn next() -> Self {
                static COUNTER: AtomicU16 = AtomicU16::new(0);
                Self(Id::next($prefix, &COUNTER))
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }

            pub fn is_unnamed(&self) -> bool {
                self.0.is_unnamed()
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Debug::fmt(&self.0, f)
            }
        }
    };
}

delegate!(
    /// A generated or unnamed server-side prepared statement name.
    StatementName, b'q'
);

delegate!(
    /// A generated or unnamed server-side portal name.
    PortalName, b'c'
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unnamed_statement_is_empty() {
        assert!(StatementName::unnamed().is_unnamed());
        assert_eq!(StatementName::unnamed().as_str(), "");
    }

    #[test]
    fn generated_names_are_unique_and_prefixed() {
        let a = StatementName::next();
        let b = StatementName::next();
        assert_ne!(a.as_str(), b.as_str());
        assert!(a.as_str().starts_with('q'));
        assert_eq!(a.as_str().len(), 6);
    }

    #[test]
    fn statement_and_portal_counters_are_independent() {
        let s = StatementName::next();
        let p = PortalName::next();
        assert!(s.as_str().starts_with('q'));
        assert!(p.as_str().starts_with('c'));
    }
}
