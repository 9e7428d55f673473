use rand::Rng;
use serde::{Deserialize, Serialize};

/// Bank code every generated account number starts with.
pub const ACCOUNT_NUMBER_PREFIX: &str = "1098";

const ACCOUNT_NUMBER_LEN: usize = 16;
const CARD_NUMBER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CardBrand {
    Visa,
    Mastercard,
}

impl CardBrand {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardBrand::Visa => "VISA",
            CardBrand::Mastercard => "MASTERCARD",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "VISA" => Some(CardBrand::Visa),
            "MASTERCARD" => Some(CardBrand::Mastercard),
            _ => None,
        }
    }

    /// Leading digit of card numbers issued under this brand.
    pub fn prefix(&self) -> &'static str {
        match self {
            CardBrand::Visa => "4",
            CardBrand::Mastercard => "5",
        }
    }
}

impl std::fmt::Display for CardBrand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Display-only card details attached to an account.
/// The full card number is never kept, only its masked form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub brand: CardBrand,
    pub number_masked: String,
    pub valid_thru: String,
    #[serde(skip_serializing, default)]
    pub cvv: String,
}

impl Card {
    /// Issue a new card with a Luhn-valid number, an expiry and a CVV.
    pub fn issue<R: Rng>(brand: CardBrand, rng: &mut R) -> Self {
        let number = generate_card_number(brand, rng);
        Self {
            brand,
            number_masked: mask_card_number(&number),
            valid_thru: generate_valid_thru(rng),
            cvv: generate_cvv(rng),
        }
    }
}

fn push_random_digits<R: Rng>(out: &mut String, target_len: usize, rng: &mut R) {
    while out.len() < target_len {
        let digit: u8 = rng.gen_range(0..10);
        out.push(char::from(b'0' + digit));
    }
}

/// Generate a 16-digit account number starting with the bank code.
pub fn generate_account_number<R: Rng>(rng: &mut R) -> String {
    let mut number = String::from(ACCOUNT_NUMBER_PREFIX);
    push_random_digits(&mut number, ACCOUNT_NUMBER_LEN, rng);
    number
}

/// Compute the Luhn check digit for a string of digits (check digit not included).
/// Non-digit characters are ignored.
pub fn luhn_check_digit(payload: &str) -> u8 {
    let sum: u32 = payload
        .chars()
        .rev()
        .filter_map(|c| c.to_digit(10))
        .enumerate()
        .map(|(i, d)| {
            if i % 2 == 0 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    ((10 - (sum % 10)) % 10) as u8
}

/// Returns true if the full number (check digit included) passes the Luhn test.
pub fn is_luhn_valid(number: &str) -> bool {
    if number.len() < 2 || !number.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let (payload, check) = number.split_at(number.len() - 1);
    check.parse::<u8>().ok() == Some(luhn_check_digit(payload))
}

/// Generate a 16-digit card number for the brand, ending in a Luhn check digit.
pub fn generate_card_number<R: Rng>(brand: CardBrand, rng: &mut R) -> String {
    let mut number = String::from(brand.prefix());
    push_random_digits(&mut number, CARD_NUMBER_LEN - 1, rng);
    let check = luhn_check_digit(&number);
    number.push(char::from(b'0' + check));
    number
}

/// Mask all but the last four digits: "**** **** **** 1234".
pub fn mask_card_number(number: &str) -> String {
    let start = number.len().saturating_sub(4);
    format!("**** **** **** {}", &number[start..])
}

/// Expiry in MM/YY form, with the year between 25 and 29.
pub fn generate_valid_thru<R: Rng>(rng: &mut R) -> String {
    let month: u8 = rng.gen_range(1..=12);
    let year: u8 = rng.gen_range(25..=29);
    format!("{:02}/{:02}", month, year)
}

pub fn generate_cvv<R: Rng>(rng: &mut R) -> String {
    rng.gen_range(100..1000u16).to_string()
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn test_luhn_known_numbers() {
        // Classic test numbers
        assert!(is_luhn_valid("4111111111111111"));
        assert!(is_luhn_valid("5555555555554444"));
        assert!(is_luhn_valid("79927398713"));
        assert!(!is_luhn_valid("4111111111111112"));
        assert!(!is_luhn_valid("4111-1111"));
        assert_eq!(luhn_check_digit("7992739871"), 3);
    }

    #[test]
    fn test_generated_card_numbers_are_valid() {
        let mut rng = StdRng::seed_from_u64(7);
        for brand in [CardBrand::Visa, CardBrand::Mastercard] {
            for _ in 0..50 {
                let number = generate_card_number(brand, &mut rng);
                assert_eq!(number.len(), 16);
                assert!(number.starts_with(brand.prefix()));
                assert!(is_luhn_valid(&number), "{} failed Luhn", number);
            }
        }
    }

    #[test]
    fn test_account_number_shape() {
        let mut rng = StdRng::seed_from_u64(42);
        let number = generate_account_number(&mut rng);
        assert_eq!(number.len(), 16);
        assert!(number.starts_with(ACCOUNT_NUMBER_PREFIX));
        assert!(number.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_mask_card_number() {
        assert_eq!(mask_card_number("4111111111111234"), "**** **** **** 1234");
    }

    #[test]
    fn test_issue_card() {
        let mut rng = StdRng::seed_from_u64(1);
        let card = Card::issue(CardBrand::Visa, &mut rng);

        assert!(card.number_masked.starts_with("**** **** **** "));
        assert_eq!(card.cvv.len(), 3);

        let (month, year) = card.valid_thru.split_once('/').unwrap();
        let month: u8 = month.parse().unwrap();
        let year: u8 = year.parse().unwrap();
        assert!((1..=12).contains(&month));
        assert!((25..=29).contains(&year));
    }

    #[test]
    fn test_serialized_card_omits_cvv() {
        let mut rng = StdRng::seed_from_u64(5);
        let card = Card::issue(CardBrand::Mastercard, &mut rng);
        let json = serde_json::to_string(&card).unwrap();

        assert!(!json.contains("cvv"));
        assert!(json.contains(&card.number_masked));
    }

    #[test]
    fn test_card_brand_roundtrip() {
        for brand in [CardBrand::Visa, CardBrand::Mastercard] {
            assert_eq!(CardBrand::from_str(brand.as_str()), Some(brand));
        }
        assert_eq!(CardBrand::from_str("amex"), None);
    }
}
