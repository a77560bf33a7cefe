//! Amount-conservation properties: allocation never loses a minor unit,
//! discounts never exceed the order, and loyalty points follow the
//! configured basis-point function exactly.

use Savora_backend::money::{Money, MoneyError};
use Savora_backend::services::rewards::{RewardsConfig, RewardsCoordinator};

#[test]
fn allocation_conserves_the_total_across_uneven_splits() {
    let totals = [1i64, 7, 99, 100, 999, 100_000, 123_457, 999_999_999];
    let weight_sets: [&[i64]; 5] = [&[1], &[1, 1], &[1, 2, 3], &[7, 11, 13, 17], &[1, 999]];

    for total in totals {
        for weights in weight_sets {
            let money = Money::from_minor(total).unwrap();
            let shares = money.allocate(weights).unwrap();
            let sum: i64 = shares.iter().map(|s| s.minor()).sum();
            assert_eq!(sum, total, "allocation of {total} over {weights:?} leaked");
            assert!(
                shares.iter().all(|s| s.minor() >= 0),
                "no share may go negative"
            );
        }
    }
}

#[test]
fn remainder_lands_on_the_last_line_item() {
    let shares = Money::from_minor(10).unwrap().allocate(&[3, 3, 3]).unwrap();
    assert_eq!(shares[0].minor(), 3);
    assert_eq!(shares[1].minor(), 3);
    assert_eq!(shares[2].minor(), 4);
}

#[test]
fn discount_can_never_push_a_total_negative() {
    let subtotal = Money::from_minor(50_000).unwrap();
    let oversized = Money::from_minor(60_000).unwrap();
    assert_eq!(
        subtotal.checked_sub(oversized),
        Err(MoneyError::NegativeResult)
    );
}

#[test]
fn one_percent_loyalty_on_the_reference_order() {
    // A 100000 VND order at 1% accrues exactly 1000 points.
    let rewards = RewardsCoordinator::new(RewardsConfig {
        loyalty_earn_bps: 100,
    });
    assert_eq!(rewards.points_for(100_000), 1_000);
}

#[test]
fn points_round_down_and_never_go_negative() {
    let rewards = RewardsCoordinator::new(RewardsConfig {
        loyalty_earn_bps: 100,
    });
    assert_eq!(rewards.points_for(99), 0);
    assert_eq!(rewards.points_for(101), 1);
    assert_eq!(rewards.points_for(0), 0);
}

#[test]
fn percentage_and_parse_agree_on_decimal_inputs() {
    let parsed = Money::parse("100000").unwrap();
    assert_eq!(parsed, Money::from_minor(100_000).unwrap());
    // 12.5% in basis points
    assert_eq!(parsed.percentage(1_250).unwrap().minor(), 12_500);
}

#[test]
fn multiply_checks_for_overflow() {
    let unit = Money::from_minor(i64::MAX / 2).unwrap();
    assert!(unit.multiply(3).is_err());
    assert!(unit.multiply(1).is_ok());
}
