//! Target market: country, optional city, and the per-country pattern
//! tables used by geographic validation and query refinement.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{DiscoveryError, Result};

/// Supported countries, (input form, ISO-2 code).
const COUNTRY_MAP: [(&str, &str); 21] = [
    ("UY", "UY"),
    ("URUGUAY", "UY"),
    ("AR", "AR"),
    ("ARGENTINA", "AR"),
    ("BR", "BR"),
    ("BRAZIL", "BR"),
    ("BRASIL", "BR"),
    ("CL", "CL"),
    ("CHILE", "CL"),
    ("CO", "CO"),
    ("COLOMBIA", "CO"),
    ("PE", "PE"),
    ("PERU", "PE"),
    ("EC", "EC"),
    ("ECUADOR", "EC"),
    ("MX", "MX"),
    ("MEXICO", "MX"),
    ("US", "US"),
    ("USA", "US"),
    ("ES", "ES"),
    ("SPAIN", "ES"),
];

/// A target market scoping geographic relevance.
///
/// Country is a validated ISO-2 code; the optional city is validated
/// against the known-city table when one exists for the country.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    country: String,
    city: Option<String>,
}

impl Market {
    /// Create a market from a country code or name and optional city.
    pub fn new(country: &str, city: Option<&str>) -> Result<Self> {
        let country = Self::validate_country(country)?;
        let city = match city {
            Some(c) if !c.trim().is_empty() => Some(Self::validate_city(&country, c)?),
            _ => None,
        };
        Ok(Self { country, city })
    }

    /// The default market (Uruguay).
    pub fn default_market() -> Self {
        Self {
            country: "UY".to_string(),
            city: None,
        }
    }

    /// ISO-2 country code.
    pub fn country(&self) -> &str {
        &self.country
    }

    /// Validated city name, if any.
    pub fn city(&self) -> Option<&str> {
        self.city.as_deref()
    }

    /// Human-readable location, e.g. `UY/Montevideo`.
    pub fn location(&self) -> String {
        match &self.city {
            Some(city) => format!("{}/{}", self.country, city),
            None => self.country.clone(),
        }
    }

    fn validate_country(country: &str) -> Result<String> {
        let upper = country.trim().to_uppercase();
        match COUNTRY_MAP.iter().find(|(input, _)| *input == upper) {
            Some((_, code)) => {
                info!("Country validated: {} -> {}", country, code);
                Ok((*code).to_string())
            }
            None => {
                let mut supported: Vec<&str> = COUNTRY_MAP.iter().map(|(_, c)| *c).collect();
                supported.sort_unstable();
                supported.dedup();
                Err(DiscoveryError::InvalidRequest {
                    reason: format!(
                        "invalid country: {}. Supported: {}",
                        country,
                        supported.join(", ")
                    ),
                })
            }
        }
    }

    fn validate_city(country: &str, city: &str) -> Result<String> {
        let known = known_cities(country);
        // No validation data for the country: accept any city
        if known.is_empty() {
            return Ok(title_case(city));
        }
        let upper = city.trim().to_uppercase();
        if known.contains(&upper.as_str()) {
            info!("City validated: {} in {}", city, country);
            Ok(title_case(city))
        } else {
            Err(DiscoveryError::InvalidRequest {
                reason: format!(
                    "invalid city: {} for country {}. Supported: {}",
                    city,
                    country,
                    known.join(", ")
                ),
            })
        }
    }

    /// Country TLD suffixes a local domain may carry.
    pub fn tlds(&self) -> &'static [&'static str] {
        match self.country.as_str() {
            "UY" => &[".uy", ".com.uy", ".edu.uy", ".gub.uy", ".org.uy", ".net.uy"],
            "AR" => &[".ar", ".com.ar", ".edu.ar", ".gob.ar", ".org.ar", ".net.ar"],
            "BR" => &[".br", ".com.br", ".edu.br", ".gov.br", ".org.br", ".net.br"],
            "CL" => &[".cl", ".com.cl", ".edu.cl", ".gob.cl", ".org.cl", ".net.cl"],
            "CO" => &[".co", ".com.co", ".edu.co", ".gov.co", ".org.co", ".net.co"],
            "PE" => &[".pe", ".com.pe", ".edu.pe", ".gob.pe", ".org.pe", ".net.pe"],
            "EC" => &[".ec", ".com.ec", ".edu.ec", ".gob.ec", ".org.ec", ".net.ec"],
            "MX" => &[".mx", ".com.mx", ".edu.mx", ".gob.mx", ".org.mx", ".net.mx"],
            "US" => &[".us", ".com", ".edu", ".gov", ".org", ".net"],
            "ES" => &[".es", ".com.es", ".edu.es", ".gob.es", ".org.es", ".net.es"],
            _ => &[".com"],
        }
    }

    /// Known e-commerce domains serving this market.
    pub fn known_marketplaces(&self) -> &'static [&'static str] {
        match self.country.as_str() {
            "UY" => &[
                "mercadolibre.com.uy",
                "tiendainglesa.com.uy",
                "devoto.com.uy",
                "farmacity.com.uy",
                "disco.com.uy",
                "geant.com.uy",
                "zonaamerica.com",
                "puntashop.com",
                "lider.com.uy",
            ],
            "AR" => &[
                "mercadolibre.com.ar",
                "pedidosya.com.ar",
                "tiendamia.com.ar",
                "falabella.com.ar",
                "garbarino.com",
                "fravega.com",
            ],
            "BR" => &[
                "mercadolivre.com.br",
                "americanas.com.br",
                "submarino.com.br",
                "magazineluiza.com.br",
                "casasbahia.com.br",
                "extra.com.br",
            ],
            "CL" => &[
                "mercadolibre.cl",
                "falabella.com",
                "ripley.cl",
                "lider.cl",
                "paris.cl",
                "sodimac.cl",
            ],
            "CO" => &[
                "mercadolibre.com.co",
                "falabella.com.co",
                "exito.com",
                "alkosto.com",
                "linio.com.co",
                "homecenter.com.co",
            ],
            "PE" => &[
                "mercadolibre.com.pe",
                "falabella.com.pe",
                "ripley.com.pe",
                "wong.pe",
                "tottus.com.pe",
                "plazavea.com.pe",
            ],
            "EC" => &[
                "mercadolibre.com.ec",
                "de-una.com",
                "megamaxi.com",
                "supermaxi.com",
                "tia.com.ec",
                "comandato.com",
            ],
            "MX" => &[
                "mercadolibre.com.mx",
                "amazon.com.mx",
                "liverpool.com.mx",
                "elektra.com.mx",
                "coppel.com",
                "soriana.com",
            ],
            "US" => &[
                "amazon.com",
                "walmart.com",
                "target.com",
                "bestbuy.com",
                "homedepot.com",
                "lowes.com",
            ],
            "ES" => &[
                "amazon.es",
                "elcorteingles.es",
                "carrefour.es",
                "mediamarkt.es",
                "worten.es",
                "fnac.es",
            ],
            _ => &[],
        }
    }

    /// Substrings in a domain name that indicate this country.
    pub fn domain_indicators(&self) -> &'static [&'static str] {
        match self.country.as_str() {
            "UY" => &["uruguay", "montevideo"],
            "AR" => &["argentina", "buenosaires"],
            "BR" => &["brasil", "brazil", "saopaulo"],
            "CL" => &["chile", "santiago"],
            "CO" => &["colombia", "bogota"],
            "PE" => &["peru", "lima"],
            "EC" => &["ecuador", "quito"],
            "MX" => &["mexico", "mexicocity"],
            "US" => &["usa", "america"],
            "ES" => &["espana", "spain", "madrid"],
            _ => &[],
        }
    }

    /// Path/query fragments that scope a page to this country.
    pub fn path_indicators(&self) -> Vec<String> {
        let code = self.country.to_lowercase();
        let base: &[&str] = match self.country.as_str() {
            "UY" => &["/uruguay/", "/montevideo/", "region=uruguay"],
            "AR" => &["/argentina/", "/buenosaires/", "region=argentina"],
            "BR" => &["/brasil/", "/brazil/", "/saopaulo/", "region=brasil"],
            "CL" => &["/chile/", "/santiago/", "region=chile"],
            "CO" => &["/colombia/", "/bogota/", "region=colombia"],
            "PE" => &["/peru/", "/lima/", "region=peru"],
            "EC" => &["/ecuador/", "/quito/", "region=ecuador"],
            "MX" => &["/mexico/", "/mexicocity/", "region=mexico"],
            "US" => &["/usa/", "/america/", "region=usa"],
            "ES" => &["/espana/", "/spain/", "/madrid/", "region=spain"],
            _ => &[],
        };
        let mut indicators: Vec<String> = base.iter().map(|s| s.to_string()).collect();
        indicators.push(format!("/{}/", code));
        indicators.push(format!("country={}", code));
        if let Some(city) = &self.city {
            let city = city.to_lowercase();
            indicators.push(format!("/{}/", city));
            indicators.push(format!("city={}", city));
            indicators.push(format!("location={}", city));
        }
        indicators
    }

    /// Geographic terms for query refinement, local language first.
    pub fn search_terms(&self) -> Vec<String> {
        let base: &[&str] = match self.country.as_str() {
            "UY" => &["uruguay", "montevideo", "maldonado", "punta del este"],
            "AR" => &["argentina", "buenos aires", "cordoba", "rosario"],
            "BR" => &["brasil", "brazil", "sao paulo", "rio"],
            "CL" => &["chile", "santiago", "valparaiso"],
            "CO" => &["colombia", "bogota", "medellin", "cali"],
            "PE" => &["peru", "lima", "arequipa"],
            "EC" => &["ecuador", "quito", "guayaquil"],
            "MX" => &["mexico", "ciudad mexico", "guadalajara", "monterrey"],
            "US" => &["usa", "america", "new york", "los angeles"],
            "ES" => &["espana", "spain", "madrid", "barcelona"],
            _ => &[],
        };
        let mut terms: Vec<String> = base.iter().map(|s| s.to_string()).collect();
        terms.push(self.country.to_lowercase());
        if let Some(city) = &self.city {
            terms.push(city.to_lowercase());
        }
        terms
    }

    /// Purchase-intent keywords shoppers in this market actually type.
    pub fn purchase_terms(&self) -> &'static [&'static str] {
        match self.country.as_str() {
            "US" => &["buy", "price", "deal", "store", "online"],
            _ => &["comprar", "precio", "oferta", "tienda", "online"],
        }
    }
}

fn known_cities(country: &str) -> &'static [&'static str] {
    match country {
        "UY" => &["MONTEVIDEO", "PUNTA DEL ESTE", "COLONIA", "SALTO", "PAYSANDU", "MALDONADO"],
        "AR" => &["BUENOS AIRES", "CORDOBA", "ROSARIO", "MENDOZA", "LA PLATA", "MAR DEL PLATA"],
        "BR" => &["SAO PAULO", "RIO DE JANEIRO", "BRASILIA", "SALVADOR", "FORTALEZA", "BELO HORIZONTE"],
        "CL" => &["SANTIAGO", "VALPARAISO", "CONCEPCION", "VINA DEL MAR", "ANTOFAGASTA", "TEMUCO"],
        "CO" => &["BOGOTA", "MEDELLIN", "CALI", "BARRANQUILLA", "CARTAGENA", "BUCARAMANGA"],
        "PE" => &["LIMA", "AREQUIPA", "TRUJILLO", "CHICLAYO", "PIURA", "CUSCO"],
        "EC" => &["QUITO", "GUAYAQUIL", "CUENCA", "AMBATO", "MANTA", "MACHALA"],
        "MX" => &["MEXICO CITY", "GUADALAJARA", "MONTERREY", "PUEBLA", "TIJUANA", "CANCUN"],
        "US" => &["NEW YORK", "LOS ANGELES", "CHICAGO", "HOUSTON", "PHOENIX", "PHILADELPHIA"],
        "ES" => &["MADRID", "BARCELONA", "VALENCIA", "SEVILLA", "ZARAGOZA", "MALAGA"],
        _ => &[],
    }
}

fn title_case(s: &str) -> String {
    s.trim()
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_normalization() {
        assert_eq!(Market::new("uruguay", None).unwrap().country(), "UY");
        assert_eq!(Market::new("UY", None).unwrap().country(), "UY");
        assert_eq!(Market::new("Brasil", None).unwrap().country(), "BR");
    }

    #[test]
    fn test_invalid_country_rejected() {
        assert!(Market::new("ZZ", None).is_err());
    }

    #[test]
    fn test_city_validation() {
        let m = Market::new("UY", Some("montevideo")).unwrap();
        assert_eq!(m.city(), Some("Montevideo"));
        assert!(Market::new("UY", Some("Springfield")).is_err());
    }

    #[test]
    fn test_location_format() {
        let m = Market::new("UY", Some("Montevideo")).unwrap();
        assert_eq!(m.location(), "UY/Montevideo");
        assert_eq!(Market::default_market().location(), "UY");
    }

    #[test]
    fn test_uy_tables() {
        let m = Market::default_market();
        assert!(m.tlds().contains(&".com.uy"));
        assert!(m.known_marketplaces().contains(&"mercadolibre.com.uy"));
        assert!(m.domain_indicators().contains(&"montevideo"));
        assert!(m.path_indicators().contains(&"/uy/".to_string()));
        assert!(m.search_terms().contains(&"uruguay".to_string()));
    }

    #[test]
    fn test_city_terms_included() {
        let m = Market::new("UY", Some("Montevideo")).unwrap();
        assert!(m.search_terms().contains(&"montevideo".to_string()));
        assert!(m.path_indicators().contains(&"city=montevideo".to_string()));
    }
}
