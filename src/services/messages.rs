//! Markdown message bodies for the notification sink

use crate::models::{DailyReport, Signal};
use crate::services::market_data::MarketSnapshot;

/// Thousands-separated amount; whole numbers drop the decimals.
/// `None` renders as `N/A`.
pub fn format_number(value: Option<f64>) -> String {
    let Some(value) = value.filter(|v| v.is_finite()) else {
        return "N/A".to_string();
    };

    let negative = value < 0.0;
    let abs = value.abs();
    let rendered = if abs.fract() == 0.0 {
        format!("{:.0}", abs)
    } else {
        format!("{:.2}", abs)
    };
    let (int_part, frac_part) = match rendered.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (rendered, None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&grouped);
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(&frac);
    }
    out
}

pub fn signal_message(signal: &Signal, market: &MarketSnapshot) -> String {
    format!(
        "{emoji} *{side}*\n\n*{symbol}*\n💰 PRICE: *{price}$*\n🏦 MARKET CAP: *{cap}$*\n📊 24H VOL: *{vol}$*",
        emoji = signal.side.emoji(),
        side = signal.side.as_str().to_uppercase(),
        symbol = signal.symbol,
        price = signal.entry_price,
        cap = format_number(market.market_cap),
        vol = format_number(market.volume_24h),
    )
}

pub fn daily_report_message(report: &DailyReport) -> String {
    format!(
        "📊 *Daily Trading Report ({date})*\n\n🟢 BUY Count: *{buy}*\n🔴 SELL Count: *{sell}*\n\nTotal Trades: *{total}*",
        date = report.date.format("%Y-%m-%d"),
        buy = report.buy_count,
        sell = report.sell_count,
        total = report.total(),
    )
}
