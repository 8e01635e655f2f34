//! A high-level StatsD metric client built on cadence.
//!
//! ## Defining Metrics
//!
//! In order to use metrics, one needs to first define one of the metric traits on a custom enum.
//! Three types of metrics are available: `counter`, `timer` and `gauge`. The metric traits serve
//! only to provide a type safe metric name, so that a counter metric cannot be used as a timer.
//!
//! ## Initializing the Client
//!
//! Metrics can be used without initializing a statsd client. In that case, invoking
//! [`with_client`] or the [`metric!`] macro will become a noop. Only when configured, metrics
//! will actually be collected.
//!
//! ```no_run
//! # use std::collections::BTreeMap;
//! # use tally_statsd::MetricsClientConfig;
//! tally_statsd::init(MetricsClientConfig {
//!     prefix: "tally",
//!     host: "localhost:8125",
//!     default_tags: BTreeMap::new(),
//! })
//! .unwrap();
//! ```
//!
//! ## Macro Usage
//!
//! ```
//! use tally_statsd::{metric, CounterMetric};
//!
//! struct EventsAccepted;
//!
//! impl CounterMetric for EventsAccepted {
//!     fn name(&self) -> &'static str {
//!         "events.accepted"
//!     }
//! }
//!
//! metric!(counter(EventsAccepted) += 1);
//! ```

use std::collections::BTreeMap;
use std::io;
use std::net::{ToSocketAddrs, UdpSocket};
use std::ops::Deref;
use std::sync::Arc;

use cadence::{BufferedUdpMetricSink, Metric, MetricBuilder, QueuingMetricSink, StatsdClient};
use parking_lot::RwLock;

/// Client configuration object to store globally.
#[derive(Debug)]
pub struct MetricsClient {
    /// The raw statsd client.
    pub statsd_client: StatsdClient,
    /// Default tags to apply to every metric.
    pub default_tags: BTreeMap<String, String>,
}

/// Client configuration used for initialization of [`MetricsClient`].
#[derive(Debug)]
pub struct MetricsClientConfig<'a, A> {
    /// Prefix which is prepended to all metric names.
    pub prefix: &'a str,
    /// Host of the metrics upstream.
    pub host: A,
    /// Tags that are added to all metrics.
    pub default_tags: BTreeMap<String, String>,
}

impl Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &StatsdClient {
        &self.statsd_client
    }
}

impl MetricsClient {
    /// Send a metric with the default tags defined on this `MetricsClient`.
    #[inline(always)]
    pub fn send_metric<'a, T>(&'a self, mut metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        for (k, v) in &self.default_tags {
            metric = metric.with_tag(k, v);
        }

        if let Err(error) = metric.try_send() {
            tally_log::error!(
                error = &error as &dyn std::error::Error,
                "error sending a metric",
            );
        }
    }
}

static METRICS_CLIENT: RwLock<Option<Arc<MetricsClient>>> = RwLock::new(None);

thread_local! {
    static CURRENT_CLIENT: std::cell::RefCell<Option<Arc<MetricsClient>>> =
        METRICS_CLIENT.read().clone().into();
}

/// Internal prelude for the macro
#[doc(hidden)]
pub mod _pred {
    pub use cadence::prelude::*;
}

/// Set a new statsd client.
pub fn set_client(client: MetricsClient) {
    *METRICS_CLIENT.write() = Some(Arc::new(client));
    CURRENT_CLIENT.with(|cell| cell.replace(METRICS_CLIENT.read().clone()));
}

/// Set a test client for the period of the called function (only affects the current thread).
///
/// Returns all metrics emitted while `f` ran, in statsd line format.
pub fn with_capturing_test_client(f: impl FnOnce()) -> Vec<String> {
    let (rx, sink) = cadence::SpyMetricSink::new();
    let test_client = MetricsClient {
        statsd_client: StatsdClient::from_sink("", sink),
        default_tags: Default::default(),
    };

    CURRENT_CLIENT.with(|cell| {
        let old_client = cell.replace(Some(Arc::new(test_client)));
        f();
        cell.replace(old_client);
    });

    rx.iter()
        .map(|x| String::from_utf8_lossy(&x).into_owned())
        .collect()
}

/// Disable the client again.
pub fn disable() {
    *METRICS_CLIENT.write() = None;
}

/// Tell the metrics system to report to statsd.
///
/// Fails if the host cannot be resolved or no local UDP socket can be bound.
pub fn init<A: ToSocketAddrs>(config: MetricsClientConfig<A>) -> io::Result<()> {
    let addr = config
        .host
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "statsd host did not resolve"))?;

    tally_log::info!("reporting metrics to statsd at {addr}");

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;
    let udp_sink = BufferedUdpMetricSink::from(addr, socket).map_err(io::Error::other)?;
    let queuing_sink = QueuingMetricSink::from(udp_sink);

    set_client(MetricsClient {
        statsd_client: StatsdClient::from_sink(config.prefix, queuing_sink),
        default_tags: config.default_tags,
    });

    Ok(())
}

/// Invoke a callback with the current statsd client.
///
/// If statsd is not configured the callback is not invoked. For the most part the [`metric!`]
/// macro should be used instead.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    CURRENT_CLIENT.with(|client| {
        if let Some(client) = client.borrow().as_deref() {
            f(client)
        } else {
            R::default()
        }
    })
}

/// A metric for capturing timings.
///
/// Timings are a positive number of milliseconds between a start and end time, such as the
/// duration of a consolidation cycle.
///
/// ## Example
///
/// ```
/// use tally_statsd::{metric, TimerMetric};
///
/// struct CycleDuration;
///
/// impl TimerMetric for CycleDuration {
///     fn name(&self) -> &'static str {
///         "consolidation.cycle.duration"
///     }
/// }
///
/// # use std::time::Instant;
/// let start_time = Instant::now();
/// metric!(timer(CycleDuration) = start_time.elapsed());
///
/// // measure time implicitly by enclosing a code block in a metric
/// metric!(timer(CycleDuration), {
///     // merge some days
/// });
/// ```
pub trait TimerMetric {
    /// Returns the timer metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing counters.
///
/// Counters are simple values incremented or decremented by a client. The rates at which these
/// events occur or average values will be determined by the server receiving them.
///
/// ## Example
///
/// ```
/// use tally_statsd::{metric, CounterMetric};
///
/// enum EventCounters {
///     Accepted,
///     Rejected,
/// }
///
/// impl CounterMetric for EventCounters {
///     fn name(&self) -> &'static str {
///         match self {
///             Self::Accepted => "events.accepted",
///             Self::Rejected => "events.rejected",
///         }
///     }
/// }
///
/// metric!(counter(EventCounters::Accepted) += 1);
/// metric!(counter(EventCounters::Rejected) += 1, reason = "content_type");
/// ```
pub trait CounterMetric {
    /// Returns the counter metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing gauges.
///
/// Gauge values are an instantaneous measurement of a value determined by the client. They do not
/// change unless changed by the client.
///
/// ## Example
///
/// ```
/// use tally_statsd::{metric, GaugeMetric};
///
/// struct WatermarkLag;
///
/// impl GaugeMetric for WatermarkLag {
///     fn name(&self) -> &'static str {
///         "consolidation.watermark.lag"
///     }
/// }
///
/// metric!(gauge(WatermarkLag) = 3);
/// ```
pub trait GaugeMetric {
    /// Returns the gauge metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// Emits a metric.
///
/// See [crate-level documentation](self) for examples.
#[macro_export]
macro_rules! metric {
    // counter increment
    (counter($id:expr) += $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        match $value {
            value if value != 0 => {
                $crate::with_client(|client| {
                    use $crate::_pred::*;
                    client.send_metric(
                        client.count_with_tags(&$crate::CounterMetric::name(&$id), value)
                        $(.with_tag(stringify!($($k).*), $v))*
                    )
                })
            },
            _ => {},
        };
    };

    // gauge set
    (gauge($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.gauge_with_tags(&$crate::GaugeMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // timer value
    (timer($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                // Durations are reported in milliseconds.
                client.distribution_with_tags(&$crate::TimerMetric::name(&$id), $value.as_nanos() as f64 / 1e6)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // timed block
    (timer($id:expr), $($($k:ident).* = $v:expr,)* $block:block) => {{
        let now = std::time::Instant::now();
        let rv = {$block};
        $crate::metric!(timer($id) = now.elapsed() $(, $($k).* = $v)*);
        rv
    }};
}
