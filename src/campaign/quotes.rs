//! Quote lookup for generated message bodies.

use std::fmt;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use tracing::debug;

use crate::error::{PoolError, Result};

/// Used whenever the remote service cannot be reached.
pub const LOCAL_QUOTES: &[&str] = &[
    "La vida es un sueño, y los sueños, sueños son. — Calderón de la Barca",
    "El secreto de la felicidad no está en hacer siempre lo que se quiere, sino en querer siempre lo que se hace. — Tolstoi",
    "La imaginación lo es todo. Es la vista previa de las próximas atracciones de la vida. — Albert Einstein",
    "Cree en ti y todo será posible. — Anónimo",
    "La paciencia es un árbol de raíz amarga pero de frutos muy dulces. — Proverbio persa",
    "No hay camino para la paz, la paz es el camino. — Mahatma Gandhi",
    "El sabio puede cambiar de opinión. El necio, nunca. — Kant",
];

const IDENTIFIER_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Quote {
    #[serde(rename = "q")]
    pub text: String,
    #[serde(rename = "a")]
    pub author: String,
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} — {}", self.text, self.author)
    }
}

pub trait QuoteSource {
    fn fetch_random_quote(&self) -> Result<Quote>;
}

/// ZenQuotes-style endpoint answering `[{"q": ..., "a": ...}]`.
pub struct RemoteQuotes {
    url: String,
    client: reqwest::blocking::Client,
}

impl RemoteQuotes {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

impl QuoteSource for RemoteQuotes {
    fn fetch_random_quote(&self) -> Result<Quote> {
        let quotes: Vec<Quote> = self
            .client
            .get(&self.url)
            .send()?
            .error_for_status()?
            .json()?;
        quotes
            .into_iter()
            .next()
            .ok_or_else(|| PoolError::Remote(format!("{} returned no quotes", self.url)))
    }
}

/// A source that is never reachable; every body uses a local quote.
pub struct NoQuotes;

impl QuoteSource for NoQuotes {
    fn fetch_random_quote(&self) -> Result<Quote> {
        Err(PoolError::Remote("quote lookup disabled".into()))
    }
}

/// Generated plain-text body for recipients without an HTML template.
pub fn fallback_body<Q, G>(recipient: &str, quotes: &Q, rng: &mut G) -> String
where
    Q: QuoteSource + ?Sized,
    G: Rng + ?Sized,
{
    let quote = match quotes.fetch_random_quote() {
        Ok(quote) => quote.to_string(),
        Err(e) => {
            debug!(error = %e, "Using local quote");
            LOCAL_QUOTES
                .choose(rng)
                .map(|q| q.to_string())
                .unwrap_or_default()
        }
    };
    let identifier: String = (0..IDENTIFIER_LEN)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect();

    format!(
        "Hola {recipient},\n\n{quote}\n\nEste es un mensaje automático de prueba.\n\
         Identificador: {identifier}\n¡Ten un buen día!"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct Fixed;

    impl QuoteSource for Fixed {
        fn fetch_random_quote(&self) -> Result<Quote> {
            Ok(Quote {
                text: "Stay hungry".into(),
                author: "Someone".into(),
            })
        }
    }

    #[test]
    fn test_body_uses_remote_quote() {
        let mut rng = StdRng::seed_from_u64(7);
        let body = fallback_body("user1@localhost", &Fixed, &mut rng);
        assert!(body.starts_with("Hola user1@localhost,\n\nStay hungry — Someone\n\n"));
        assert!(body.ends_with("¡Ten un buen día!"));
    }

    #[test]
    fn test_body_falls_back_to_local_quote() {
        let mut rng = StdRng::seed_from_u64(7);
        let body = fallback_body("user2@localhost", &NoQuotes, &mut rng);
        assert!(LOCAL_QUOTES.iter().any(|q| body.contains(q)));
    }

    #[test]
    fn test_identifier_is_alphanumeric() {
        let mut rng = StdRng::seed_from_u64(1);
        let body = fallback_body("x@y", &NoQuotes, &mut rng);
        let id = body
            .lines()
            .find_map(|l| l.strip_prefix("Identificador: "))
            .unwrap();
        assert_eq!(id.len(), IDENTIFIER_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
